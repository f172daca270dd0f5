//! The set of projects the user has visited, persisted across restarts.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
  pub id: i64,
  pub path: String,
}

/// Shape of the save file: `{ "projects": [ {id, path}, ... ] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectsSave {
  pub projects: Vec<Project>,
}

/// Sink for project announcements. The daemon's plugin driver implements
/// this; announcement failures are its problem to log, never the registry's
/// to propagate.
pub trait ProjectNotifier: Send + Sync {
  fn process_project(&self, path: &str);
}

/// Ordered set of adopted projects with stable ids.
pub struct ProjectRegistry {
  save_path: PathBuf,
  projects: RwLock<Vec<Project>>,
  notifier: Arc<dyn ProjectNotifier>,
}

impl ProjectRegistry {
  pub fn new(save_path: PathBuf, notifier: Arc<dyn ProjectNotifier>) -> Self {
    Self {
      save_path,
      projects: RwLock::new(Vec::new()),
      notifier,
    }
  }

  /// Load the save file if present and announce every project to the
  /// notifier so plugins can (re)index at leisure. A missing or malformed
  /// save file starts an empty registry; neither is fatal.
  pub async fn init(&self) {
    let loaded = match std::fs::read(&self.save_path) {
      Ok(bytes) => match serde_json::from_slice::<ProjectsSave>(&bytes) {
        Ok(save) => save.projects,
        Err(e) => {
          warn!("Malformed save file {:?}: {e}", self.save_path);
          Vec::new()
        }
      },
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        info!("Save file {:?} does not exist", self.save_path);
        Vec::new()
      }
      Err(e) => {
        warn!("Error reading save file {:?}: {e}", self.save_path);
        Vec::new()
      }
    };

    {
      let mut projects = self.projects.write().await;
      *projects = loaded.clone();
    }
    for project in &loaded {
      self.notifier.process_project(&project.path);
    }
    info!("Loaded {} projects from {:?}", loaded.len(), self.save_path);
  }

  /// Adopt `path` with the next id and announce it. `path` must already be
  /// normalized (absolute, trailing separator).
  pub async fn add(&self, path: String) -> Project {
    let project = {
      let mut projects = self.projects.write().await;
      let id = projects.last().map(|p| p.id + 1).unwrap_or(1);
      let project = Project { id, path };
      projects.push(project.clone());
      project
    };
    self.notifier.process_project(&project.path);
    project
  }

  /// Bulk adoption with contiguous ids; each project is announced.
  pub async fn add_all(&self, paths: Vec<String>) -> Vec<Project> {
    let added = {
      let mut projects = self.projects.write().await;
      let start = projects.last().map(|p| p.id + 1).unwrap_or(1);
      let added: Vec<Project> = paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| Project {
          id: start + i as i64,
          path,
        })
        .collect();
      projects.extend(added.iter().cloned());
      added
    };
    for project in &added {
      self.notifier.process_project(&project.path);
    }
    added
  }

  /// Snapshot of the current sequence, insertion order.
  pub async fn projects(&self) -> Vec<Project> {
    self.projects.read().await.clone()
  }

  pub async fn find_by_path(&self, path: &str) -> Option<Project> {
    self.projects.read().await.iter().find(|p| p.path == path).cloned()
  }

  /// Write the registry to the save file, atomically (temp file + rename).
  pub async fn save(&self) -> std::io::Result<()> {
    let save = ProjectsSave {
      projects: self.projects.read().await.clone(),
    };
    let bytes = serde_json::to_vec(&save).map_err(std::io::Error::other)?;

    let tmp = self.save_path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, &self.save_path)?;
    info!("Saved {} projects to {:?}", save.projects.len(), self.save_path);
    Ok(())
  }
}
