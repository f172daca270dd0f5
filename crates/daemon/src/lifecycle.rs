//! Daemon lifecycle: single-instance lock, startup ordering, graceful
//! shutdown.
//!
//! Bring-up is driver → registry (announce fan-out) → HTTP listener;
//! teardown is listener → save registry → kill plugins.

use crate::driver::{DriverNotifier, PluginDriver};
use crate::server::{router, AppState};
use pogo_core::ProjectRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Another instance holds the lock at {0:?}")]
  Locked(PathBuf),
}

/// PID lock file guaranteeing a single daemon instance.
pub struct PidLock {
  path: PathBuf,
}

impl PidLock {
  /// Create the lock file with our PID. An existing file whose recorded
  /// process is gone counts as stale and is replaced.
  pub fn acquire(path: PathBuf) -> Result<Self, LifecycleError> {
    match Self::try_create(&path) {
      Ok(lock) => Ok(lock),
      Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
        if holder_is_alive(&path) {
          return Err(LifecycleError::Locked(path));
        }
        warn!("Removing stale lock {:?}", path);
        std::fs::remove_file(&path)?;
        Self::try_create(&path).map_err(|_| LifecycleError::Locked(path))
      }
      Err(e) => Err(e.into()),
    }
  }

  fn try_create(path: &PathBuf) -> std::io::Result<Self> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    write!(file, "{}", std::process::id())?;
    Ok(Self { path: path.clone() })
  }

  pub fn release(self) {
    if let Err(e) = std::fs::remove_file(&self.path) {
      warn!("Cannot unlock {:?}: {e}", self.path);
    }
  }
}

fn holder_is_alive(path: &PathBuf) -> bool {
  let pid = match std::fs::read_to_string(path).map(|s| s.trim().parse::<u32>()) {
    Ok(Ok(pid)) => pid,
    _ => return false,
  };
  #[cfg(target_os = "linux")]
  {
    PathBuf::from(format!("/proc/{pid}")).exists()
  }
  #[cfg(not(target_os = "linux"))]
  {
    let _ = pid;
    true
  }
}

pub struct Daemon {
  registry: Arc<ProjectRegistry>,
  driver: PluginDriver,
  listen_addr: String,
}

impl Daemon {
  /// Construct the daemon's object graph: driver first, then the registry
  /// wired to announce into it.
  pub fn new(plugin_dir: &std::path::Path, save_path: PathBuf, listen_addr: String) -> Self {
    let driver = PluginDriver::init(plugin_dir);
    let notifier = Arc::new(DriverNotifier(driver.clone()));
    let registry = Arc::new(ProjectRegistry::new(save_path, notifier));
    Self {
      registry,
      driver,
      listen_addr,
    }
  }

  pub fn registry(&self) -> Arc<ProjectRegistry> {
    Arc::clone(&self.registry)
  }

  pub fn driver(&self) -> PluginDriver {
    self.driver.clone()
  }

  /// Serve until ctrl-c, then tear down in order.
  pub async fn run(&self) -> Result<(), LifecycleError> {
    self.registry.init().await;

    let state = Arc::new(AppState {
      registry: Arc::clone(&self.registry),
      driver: self.driver.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
    info!("pogod listening on {}", self.listen_addr);

    axum::serve(listener, router(state))
      .with_graceful_shutdown(async {
        if let Err(e) = signal::ctrl_c().await {
          warn!("Failed to listen for ctrl-c: {e}");
        }
        info!("Received ctrl-c, shutting down");
      })
      .await?;

    if let Err(e) = self.registry.save().await {
      warn!("Error saving projects: {e}");
    }
    self.driver.kill();
    info!("Daemon shutdown complete");
    Ok(())
  }
}
