//! The plugin driver: discovers plugin executables, supervises their
//! processes, and dispatches RPC to them. One misbehaving plugin must never
//! take the daemon down, so every fan-out call runs inside a panic
//! boundary.

use crate::external::{sha256_file, ExternalPlugin, RPC_TIMEOUT};
use pogo_core::ProjectNotifier;
use pogo_plugin::PluginInfo;
use pogo_search::SearchEngine;
use serde_json::json;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Name the in-process search engine registers under.
pub const BUILTIN_SEARCH: &str = "pogo-plugin-search";

/// Filename prefix external plugin executables must carry.
const PLUGIN_PREFIX: &str = "pogo";

/// Execute calls may themselves run a bounded search; give them room.
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
enum PluginHandle {
  /// In-process plugin; nothing to supervise.
  Builtin(SearchEngine),
  External(ExternalPlugin),
}

/// Cheap to clone; clones share the plugin table and the built-in engine.
#[derive(Clone)]
pub struct PluginDriver {
  plugins: Arc<Mutex<HashMap<String, PluginHandle>>>,
  engine: SearchEngine,
}

impl PluginDriver {
  /// Bring the driver up: register the built-in search engine, then
  /// discover and launch external `pogo*` executables from `plugin_dir`.
  /// A plugin that fails to launch is logged and skipped; the built-in
  /// guarantees at least one plugin is always available.
  pub fn init(plugin_dir: &Path) -> Self {
    let engine = SearchEngine::spawn();
    let driver = Self {
      plugins: Arc::new(Mutex::new(HashMap::new())),
      engine: engine.clone(),
    };
    driver
      .lock_plugins()
      .insert(BUILTIN_SEARCH.to_string(), PluginHandle::Builtin(engine));

    let paths = discover(plugin_dir);
    info!("Discovered {} plugins in {:?}: {:?}", paths.len(), plugin_dir, paths);
    for path in paths {
      // Pin the checksum now; launch re-hashes and refuses a binary that
      // changed since discovery.
      let pinned = match sha256_file(&path) {
        Ok(pinned) => pinned,
        Err(e) => {
          error!("Error hashing plugin {:?}: {e}", path);
          continue;
        }
      };
      let launched = catch_unwind(AssertUnwindSafe(|| ExternalPlugin::launch(&path, &pinned)));
      match launched {
        Ok(Ok(plugin)) => {
          let key = path.to_string_lossy().into_owned();
          driver.lock_plugins().insert(key, PluginHandle::External(plugin));
        }
        Ok(Err(e)) => error!("Error launching plugin {:?}: {e}", path),
        Err(_) => error!("Caught panic during plugin creation: {:?}", path),
      }
    }
    driver
  }

  /// Registered plugin names: the built-in plus discovered executable
  /// paths, sorted.
  pub fn plugin_paths(&self) -> Vec<String> {
    let mut paths: Vec<String> = self.lock_plugins().keys().cloned().collect();
    paths.sort();
    paths
  }

  /// The in-process engine, for callers that embed the driver.
  pub fn engine(&self) -> SearchEngine {
    self.engine.clone()
  }

  /// `Info` on one plugin. Restarts a dead child first.
  pub async fn info(&self, path: &str) -> Option<PluginInfo> {
    match self.check_alive(path).await? {
      PluginHandle::Builtin(engine) => Some(engine.info()),
      PluginHandle::External(plugin) => {
        let joined = tokio::task::spawn_blocking(move || {
          plugin
            .call_expecting_result("info", None, RPC_TIMEOUT)
            .map_err(|e| warn!("Error finding plugin info: {e}"))
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
        })
        .await;
        joined.ok().flatten()
      }
    }
  }

  /// `Execute` on one plugin; payloads pass through opaque.
  pub async fn execute(&self, path: &str, value: &str) -> Option<String> {
    match self.check_alive(path).await? {
      PluginHandle::Builtin(engine) => Some(engine.execute(value).await),
      PluginHandle::External(plugin) => {
        let value = value.to_string();
        let joined = tokio::task::spawn_blocking(move || {
          plugin
            .call_expecting_result("execute", Some(json!(value)), EXECUTE_TIMEOUT)
            .map_err(|e| warn!("Error executing plugin call: {e}"))
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
        })
        .await;
        joined.ok().flatten()
      }
    }
  }

  /// Fan `ProcessProject` out to every plugin, each call in its own panic
  /// boundary. Fire-and-forget: external calls run on blocking tasks.
  pub fn process_project_all(&self, path: &str) {
    let snapshot: Vec<(String, PluginHandle)> = self
      .lock_plugins()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();

    for (name, handle) in snapshot {
      match handle {
        PluginHandle::Builtin(engine) => {
          if catch_unwind(AssertUnwindSafe(|| engine.process_project(path))).is_err() {
            error!("Caught panic calling ProcessProject on {name}");
          }
        }
        PluginHandle::External(plugin) => {
          let path = path.to_string();
          tokio::task::spawn_blocking(move || {
            let call = catch_unwind(AssertUnwindSafe(|| {
              plugin.call_expecting_result("process_project", Some(json!({ "path": path })), RPC_TIMEOUT)
            }));
            match call {
              Ok(Ok(_)) => {}
              Ok(Err(e)) => warn!("Error calling ProcessProject on {name}: {e}"),
              Err(_) => error!("Caught panic calling ProcessProject on {name}"),
            }
          });
        }
      }
    }
  }

  /// Terminate every child and the in-process engine. Each termination
  /// runs in its own panic boundary.
  pub fn kill(&self) {
    let snapshot: Vec<(String, PluginHandle)> = self
      .lock_plugins()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();

    for (name, handle) in snapshot {
      if let PluginHandle::External(plugin) = handle {
        if catch_unwind(AssertUnwindSafe(|| plugin.kill())).is_err() {
          error!("Caught panic during plugin termination: {name}");
        }
      }
    }
    self.engine.shutdown();
  }

  /// Fetch a live handle, relaunching an exited child after verifying the
  /// binary still matches the checksum pinned at discovery. A failed or
  /// rejected relaunch keeps the dead entry so the next access retries;
  /// a deliberately replaced binary needs a daemon restart to re-pin.
  async fn check_alive(&self, path: &str) -> Option<PluginHandle> {
    let driver = self.clone();
    let path = path.to_string();
    tokio::task::spawn_blocking(move || driver.check_alive_blocking(&path))
      .await
      .ok()
      .flatten()
  }

  fn check_alive_blocking(&self, path: &str) -> Option<PluginHandle> {
    let mut plugins = self.lock_plugins();
    match plugins.get(path) {
      Some(PluginHandle::Builtin(engine)) => Some(PluginHandle::Builtin(engine.clone())),
      Some(PluginHandle::External(plugin)) => {
        if plugin.is_alive() {
          return Some(PluginHandle::External(plugin.clone()));
        }
        warn!("Plugin {path} exited, restarting");
        let (plugin_path, pinned) = (plugin.path().to_path_buf(), plugin.checksum().to_string());
        match ExternalPlugin::launch(&plugin_path, &pinned) {
          Ok(fresh) => {
            let handle = PluginHandle::External(fresh);
            plugins.insert(path.to_string(), handle.clone());
            Some(handle)
          }
          Err(e) => {
            error!("Error restarting plugin {path}: {e}");
            None
          }
        }
      }
      None => None,
    }
  }

  fn lock_plugins(&self) -> std::sync::MutexGuard<'_, HashMap<String, PluginHandle>> {
    match self.plugins.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }
}

/// Announcement seam between the registry and the driver.
pub struct DriverNotifier(pub PluginDriver);

impl ProjectNotifier for DriverNotifier {
  fn process_project(&self, path: &str) {
    self.0.process_project_all(path);
  }
}

/// Executable files named `pogo*` in `dir`.
fn discover(dir: &Path) -> Vec<PathBuf> {
  let entries = match std::fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) => {
      warn!("Error discovering plugins in {:?}: {e}", dir);
      return Vec::new();
    }
  };

  let mut paths: Vec<PathBuf> = entries
    .filter_map(|e| e.ok())
    .filter(|e| {
      e.file_name().to_string_lossy().starts_with(PLUGIN_PREFIX)
        && e.file_type().map(|t| t.is_file()).unwrap_or(false)
        && is_executable(&e.path())
    })
    .map(|e| e.path())
    .collect();
  paths.sort();
  paths
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
  use std::os::unix::fs::PermissionsExt;
  std::fs::metadata(path)
    .map(|m| m.permissions().mode() & 0o111 != 0)
    .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
  true
}
