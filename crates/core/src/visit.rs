//! Visit resolution: map a filesystem path to its owning project, adopting
//! a new project when the ascent finds a version-control marker.

use crate::config::{normalize_lexical, with_trailing_separator};
use crate::registry::{Project, ProjectRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MSG_PATH_MISSING: &str = "'path' field missing.";
pub const MSG_PATH_RELATIVE: &str = "'path' cannot be relative.";
pub const MSG_NOT_FOUND: &str = "The resource was not found.";
pub const MSG_INTERNAL: &str = "An internal error was encountered.";

/// File that halts the upward ascent at its enclosing directory.
const STOP_MARKER: &str = ".pogo_stop";
/// Directory whose presence marks a project root.
const VCS_MARKER: &str = ".git";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRequest {
  #[serde(default)]
  pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitResponse {
  pub project: Project,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VisitError {
  #[error("{0}")]
  BadRequest(String),
  #[error("{MSG_NOT_FOUND}")]
  NotFound,
  #[error("{MSG_INTERNAL}")]
  Internal,
}

impl VisitError {
  pub fn code(&self) -> u16 {
    match self {
      VisitError::BadRequest(_) => 400,
      VisitError::NotFound => 404,
      VisitError::Internal => 500,
    }
  }
}

impl ProjectRegistry {
  /// Resolve `request.path` to its owning project.
  ///
  /// A path whose normalized directory equals an existing project root
  /// returns that project. Otherwise the resolver ascends toward the
  /// filesystem root looking for a `.git` entry and adopts the first
  /// directory that has one. A `.pogo_stop` file anywhere on the way up
  /// halts the ascent.
  pub async fn visit(&self, request: VisitRequest) -> Result<VisitResponse, VisitError> {
    let path = request.path;
    if path.is_empty() {
      return Err(VisitError::BadRequest(MSG_PATH_MISSING.to_string()));
    }
    if !Path::new(&path).is_absolute() {
      return Err(VisitError::BadRequest(MSG_PATH_RELATIVE.to_string()));
    }

    let dir = normalize_to_dir(&path);
    let normalized = with_trailing_separator(&dir);

    // Containment is equality on normalized directories. Prefix matching
    // adopts the wrong project when a sibling shares a name prefix.
    if let Some(project) = self.find_by_path(&normalized).await {
      debug!("Visit hit existing project {}", project.path);
      return Ok(VisitResponse { project });
    }

    match std::fs::metadata(&dir) {
      Ok(meta) if meta.is_dir() => {}
      Ok(_) => return Err(VisitError::NotFound),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!("Visit of missing path {:?}", dir);
        return Err(VisitError::NotFound);
      }
      Err(e) => {
        warn!("Error inspecting {:?}: {e}", dir);
        return Err(VisitError::Internal);
      }
    }

    self.ascend_and_adopt(dir).await
  }

  async fn ascend_and_adopt(&self, start: PathBuf) -> Result<VisitResponse, VisitError> {
    let mut current = start;
    loop {
      let names = read_child_names(&current)?;

      if names.iter().any(|n| n == STOP_MARKER) {
        debug!("Ascent stopped by {STOP_MARKER} in {:?}", current);
        return Err(VisitError::NotFound);
      }

      if names.iter().any(|n| n == VCS_MARKER) {
        let root = with_trailing_separator(&current);
        // The ascent can land on a root that is already adopted (a visit
        // deep inside a known project); ids must stay unique per path.
        if let Some(project) = self.find_by_path(&root).await {
          return Ok(VisitResponse { project });
        }
        let project = self.add(root).await;
        info!("Adopted project {} at {}", project.id, project.path);
        return Ok(VisitResponse { project });
      }

      match current.parent() {
        Some(parent) if parent != current => current = parent.to_path_buf(),
        _ => return Err(VisitError::NotFound),
      }
    }
  }
}

/// Lexically normalize and, when the path names an existing file, take its
/// directory.
fn normalize_to_dir(path: &str) -> PathBuf {
  let cleaned = normalize_lexical(Path::new(path));
  match std::fs::metadata(&cleaned) {
    Ok(meta) if !meta.is_dir() => cleaned.parent().map(Path::to_path_buf).unwrap_or(cleaned),
    _ => cleaned,
  }
}

fn read_child_names(dir: &Path) -> Result<Vec<String>, VisitError> {
  let entries = std::fs::read_dir(dir).map_err(|e| {
    warn!("Error listing {:?}: {e}", dir);
    VisitError::Internal
  })?;
  Ok(
    entries
      .filter_map(|e| e.ok())
      .map(|e| e.file_name().to_string_lossy().into_owned())
      .collect(),
  )
}
