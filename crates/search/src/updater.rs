//! The single writer that owns the engine's mutable state.
//!
//! Walkers and the watcher event drainer never touch the projects map or
//! the watcher registrations directly; they enqueue commands here and the
//! writer applies them one at a time, in arrival order. That serializes
//! commits with watch add/remove and makes disk writes per project
//! sequential.

use crate::index::{build_code_index, write_sidecar};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use pogo_plugin::IndexedProject;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum UpdateCommand {
  /// Replace the project under its root and serialize it to disk.
  Commit(IndexedProject),
  /// Register a directory with the filesystem watcher.
  AddWatch(PathBuf),
  /// Deregister a path from the watcher.
  RemoveWatch(PathBuf),
  /// Drain and terminate the loop.
  Quit,
}

/// Handle for enqueuing commands to the writer. Cheap to clone.
///
/// Sends never block: the channel is unbounded, so producers cannot
/// deadlock against the writer and the writer never waits on a producer.
#[derive(Clone)]
pub struct Updater {
  tx: mpsc::UnboundedSender<UpdateCommand>,
}

impl Updater {
  pub fn commit(&self, project: IndexedProject) {
    self.send(UpdateCommand::Commit(project));
  }

  pub fn add_watch(&self, path: PathBuf) {
    self.send(UpdateCommand::AddWatch(path));
  }

  pub fn remove_watch(&self, path: PathBuf) {
    self.send(UpdateCommand::RemoveWatch(path));
  }

  pub fn quit(&self) {
    self.send(UpdateCommand::Quit);
  }

  fn send(&self, command: UpdateCommand) {
    if self.tx.send(command).is_err() {
      warn!("Updater is gone, command dropped");
    }
  }
}

/// Raw watcher events forwarded to the event drainer.
pub type EventReceiver = mpsc::UnboundedReceiver<Result<notify::Event, notify::Error>>;

/// Spawn the writer task. Returns the command handle and the stream of
/// watcher events for the drainer.
pub fn spawn(projects: Arc<RwLock<HashMap<String, IndexedProject>>>) -> (Updater, EventReceiver) {
  let (event_tx, event_rx) = mpsc::unbounded_channel();
  let watcher = match RecommendedWatcher::new(
    move |event| {
      let _ = event_tx.send(event);
    },
    notify::Config::default(),
  ) {
    Ok(w) => Some(w),
    Err(e) => {
      error!("Could not create file watcher, reindex will only run on demand: {e}");
      None
    }
  };

  let (tx, rx) = mpsc::unbounded_channel();
  tokio::task::spawn_blocking(move || write_loop(rx, watcher, projects));
  (Updater { tx }, event_rx)
}

fn write_loop(
  mut rx: mpsc::UnboundedReceiver<UpdateCommand>,
  mut watcher: Option<RecommendedWatcher>,
  projects: Arc<RwLock<HashMap<String, IndexedProject>>>,
) {
  while let Some(command) = rx.blocking_recv() {
    match command {
      UpdateCommand::Commit(project) => {
        {
          let mut map = match projects.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
          };
          map.insert(project.root.clone(), project.clone());
        }
        if let Err(e) = write_sidecar(&project) {
          error!("Error saving index for {}: {e}", project.root);
        }
        if let Err(e) = build_code_index(&project) {
          error!("Error building code search index for {}: {e}", project.root);
        }
      }
      UpdateCommand::AddWatch(path) => {
        let Some(w) = watcher.as_mut() else {
          warn!("Watcher is unavailable, not watching {:?}", path);
          continue;
        };
        if let Err(e) = w.watch(&path, RecursiveMode::NonRecursive) {
          error!("Error adding file watcher for {:?}: {e}", path);
        }
      }
      UpdateCommand::RemoveWatch(path) => {
        let Some(w) = watcher.as_mut() else {
          continue;
        };
        // Removed subtree entries were often never watched themselves;
        // a failed unwatch is routine.
        if let Err(e) = w.unwatch(&path) {
          debug!("Unwatch {:?}: {e}", path);
        }
      }
      UpdateCommand::Quit => break,
    }
  }
  info!("Updater loop terminated");
}
