//! The indexing and search engine served by the `pogo-search` plugin.
//!
//! One engine instance owns a map of indexed projects and a filesystem
//! watcher. All mutation goes through the single-writer updater; walks and
//! watcher-driven reindexing only ever enqueue commands. The engine value
//! itself is a cheap handle: clones share the same state.

use crate::ignore_rules::IgnoreRules;
use crate::index::{load_sidecar, parse_duration, run_search};
use crate::updater::{self, EventReceiver, Updater};
use notify::event::ModifyKind;
use notify::EventKind;
use pogo_plugin::{
  encode_error, IndexedProject, PluginInfo, ProcessProjectRequest, ProtocolError, SearchPlugin, SearchRequest,
  SearchResponse, SearchResults, API_VERSION,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

const INDEX_START_CAPACITY: usize = 50;

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("unknown project {0}")]
  UnknownProject(String),
  #[error("index error: {0}")]
  Index(String),
  #[error("query parse error: {0}")]
  QueryParse(String),
  #[error("search timed out")]
  Timeout,
}

#[derive(Clone)]
pub struct SearchEngine {
  projects: Arc<RwLock<HashMap<String, IndexedProject>>>,
  updater: Updater,
}

impl SearchEngine {
  /// Create the engine and start its writer and event-drainer tasks.
  pub fn spawn() -> Self {
    let projects = Arc::new(RwLock::new(HashMap::new()));
    let (updater, events) = updater::spawn(Arc::clone(&projects));
    let engine = Self { projects, updater };
    tokio::spawn(drain_events(engine.clone(), events));
    engine
  }

  pub fn info(&self) -> PluginInfo {
    debug!("Returning version {API_VERSION}");
    PluginInfo {
      version: API_VERSION.to_string(),
    }
  }

  /// Snapshot of an indexed project, if any.
  pub fn project(&self, root: &str) -> Option<IndexedProject> {
    self.read_projects().get(root).cloned()
  }

  /// Stop the writer loop. In-flight walks finish but their commits land
  /// nowhere.
  pub fn shutdown(&self) {
    self.updater.quit();
  }

  /// Fire-and-forget: schedule indexing for a project root. An index
  /// already on disk from a previous run is adopted instead of re-walking.
  pub fn process_project(&self, path: &str) {
    let root = clean(path);
    info!("Processing project {root}");
    let engine = self.clone();
    tokio::task::spawn_blocking(move || {
      if engine.read_projects().contains_key(&root) {
        info!("Already indexed {root}");
        return;
      }
      match load_sidecar(&root) {
        Ok(existing) if existing.root == root && !existing.paths.is_empty() => {
          info!("Adopting existing index for {root}");
          engine.updater.commit(existing);
        }
        _ => engine.index(&root),
      }
    });
  }

  /// Walk `root` and commit the resulting path list. Idempotent per root.
  fn index(&self, root: &str) {
    if self.read_projects().contains_key(root) {
      info!("Already indexed {root}");
      return;
    }
    let rules = IgnoreRules::parse(Path::new(root));
    let mut project = IndexedProject {
      root: root.to_string(),
      paths: Vec::with_capacity(INDEX_START_CAPACITY),
    };
    self.updater.add_watch(PathBuf::from(root));
    if let Err(e) = self.walk(&mut project, Path::new(root), &rules) {
      warn!("Error indexing project {root}: {e}");
      return;
    }
    self.updater.commit(project);
  }

  /// Depth-first walk appending regular files (as root-relative paths) and
  /// registering a watch for every directory entered. Per-entry failures
  /// are logged and skipped; the walk continues.
  fn walk(&self, project: &mut IndexedProject, dir: &Path, rules: &IgnoreRules) -> std::io::Result<()> {
    let entries = std::fs::read_dir(dir)?;
    let mut files = Vec::new();
    for entry in entries {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          warn!("Error listing entry in {:?}: {e}", dir);
          continue;
        }
      };
      let full = entry.path();
      let meta = match std::fs::symlink_metadata(&full) {
        Ok(meta) => meta,
        Err(e) => {
          warn!("Error inspecting {:?}: {e}", full);
          continue;
        }
      };
      let name = entry.file_name().to_string_lossy().into_owned();
      if name == ".git" || name == ".pogo" {
        continue;
      }
      let relative = match full.strip_prefix(&project.root) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => continue,
      };
      if rules.is_ignored(&relative, meta.is_dir()) {
        continue;
      }
      if meta.is_dir() {
        self.updater.add_watch(full.clone());
        if let Err(e) = self.walk(project, &full, rules) {
          warn!("Error walking {:?}: {e}", full);
        }
      } else if meta.is_file() {
        files.push(relative);
      }
    }
    project.paths.extend(files);
    Ok(())
  }

  /// React to a watcher event: drop the stale subtree from the affected
  /// project and re-walk it.
  pub fn reindex(&self, path: &Path) {
    let dir = match std::fs::symlink_metadata(path) {
      Ok(meta) if meta.is_dir() => path.to_path_buf(),
      _ => match path.parent() {
        Some(parent) => parent.to_path_buf(),
        None => return,
      },
    };
    let engine = self.clone();
    tokio::task::spawn_blocking(move || engine.reindex_blocking(&dir));
  }

  fn reindex_blocking(&self, dir: &Path) {
    let full = with_trailing_separator(dir);
    let snapshot = self.read_projects().clone();
    for (root, indexed) in snapshot {
      if !full.starts_with(root.as_str()) {
        continue;
      }
      let relative = full[root.len()..].to_string();

      // Never re-walk into the bookkeeping directories or an
      // ignore-matched subtree; events under them fire whenever the
      // sidecar is written.
      let rel_dir = relative.trim_end_matches(MAIN_SEPARATOR);
      if rel_dir.split(MAIN_SEPARATOR).any(|c| c == ".git" || c == ".pogo") {
        return;
      }
      let rules = IgnoreRules::parse(Path::new(&root));
      if !rel_dir.is_empty() && rules.is_ignored_with_parents(rel_dir, true) {
        return;
      }

      info!("Reindexing {:?} under {root}", dir);
      let mut project = indexed;
      let mut kept = Vec::with_capacity(project.paths.len());
      for p in project.paths {
        if p.starts_with(&relative) {
          self.updater.remove_watch(Path::new(&root).join(&p));
        } else {
          kept.push(p);
        }
      }
      project.paths = kept;

      self.updater.add_watch(dir.to_path_buf());
      if let Err(e) = self.walk(&mut project, dir, &rules) {
        warn!("Error reindexing {:?}: {e}", dir);
      }
      self.updater.commit(project);
      return;
    }
    debug!("Reindex of {:?} matched no project", dir);
  }

  /// The sidecar's view of an indexed project.
  pub fn get_files(&self, root: &str) -> Result<IndexedProject, EngineError> {
    if !self.read_projects().contains_key(root) {
      return Err(EngineError::UnknownProject(root.to_string()));
    }
    load_sidecar(root)
  }

  /// Query the code-search index, optionally bounded by `duration`. An
  /// expired deadline flags the blocking task so it bails at its next
  /// cancellation checkpoint instead of running to completion.
  pub async fn search(&self, root: &str, data: &str, duration: &str) -> Result<SearchResults, EngineError> {
    if !self.read_projects().contains_key(root) {
      return Err(EngineError::UnknownProject(root.to_string()));
    }
    let root = root.to_string();
    let query = data.to_string();
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    let task = tokio::task::spawn_blocking(move || run_search(&root, &query, &flag));

    match parse_duration(duration) {
      Some(limit) => match tokio::time::timeout(limit, task).await {
        Ok(joined) => joined.map_err(|e| EngineError::Index(e.to_string()))?,
        Err(_) => {
          cancelled.store(true, Ordering::Relaxed);
          Err(EngineError::Timeout)
        }
      },
      // Unparseable or absent duration runs without a deadline.
      None => task.await.map_err(|e| EngineError::Index(e.to_string()))?,
    }
  }

  /// Execute a URL-encoded request and return a URL-encoded response.
  pub async fn execute(&self, encoded: &str) -> String {
    debug!("Executing request");
    let decoded = match urlencoding::decode(encoded) {
      Ok(decoded) => decoded.into_owned(),
      Err(e) => {
        warn!("500 Could not query decode request: {e}");
        return encode_error(500, "Could not query decode request.");
      }
    };
    let request: SearchRequest = match serde_json::from_str(&decoded) {
      Ok(request) => request,
      Err(e) => {
        info!("400 Invalid request: {e}");
        return encode_error(400, "Invalid request.");
      }
    };

    match request.kind.as_str() {
      "search" => {
        let root = clean(&request.project_root);
        match self.search(&root, &request.data, &request.duration).await {
          Ok(results) => SearchResponse::with_results(results).encode(),
          Err(e) => {
            warn!("500 Error executing search: {e}");
            encode_error(500, "Error executing search.")
          }
        }
      }
      "files" => {
        let root = clean(&request.project_root);
        match self.get_files(&root) {
          Ok(index) => SearchResponse::with_index(index).encode(),
          Err(e) => {
            warn!("500 Error retrieving files: {e}");
            encode_error(500, "Error retrieving files.")
          }
        }
      }
      other => {
        info!("404 Unknown request type {other:?}");
        encode_error(404, "Unknown request type.")
      }
    }
  }

  fn read_projects(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, IndexedProject>> {
    match self.projects.read() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }
}

impl SearchPlugin for SearchEngine {
  fn info(&self) -> PluginInfo {
    SearchEngine::info(self)
  }

  async fn execute(&self, request: &str) -> String {
    SearchEngine::execute(self, request).await
  }

  async fn process_project(&self, request: &ProcessProjectRequest) -> Result<(), ProtocolError> {
    SearchEngine::process_project(self, &request.path);
    Ok(())
  }
}

/// Feed watcher events into reindexing. Errors on the stream are logged
/// and drained; the loop ends when the watcher is dropped.
async fn drain_events(engine: SearchEngine, mut events: EventReceiver) {
  while let Some(event) = events.recv().await {
    match event {
      Ok(event) => {
        if reindex_worthy(&event.kind) {
          for path in &event.paths {
            debug!("File update: {:?} {:?}", event.kind, path);
            engine.reindex(path);
          }
        }
      }
      Err(e) => warn!("File watcher error: {e}"),
    }
  }
  debug!("Watcher event stream closed");
}

fn reindex_worthy(kind: &EventKind) -> bool {
  matches!(
    kind,
    EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
  )
}

/// Append a trailing separator if missing.
fn with_trailing_separator(path: &Path) -> String {
  let mut s = path.to_string_lossy().into_owned();
  if !s.ends_with(MAIN_SEPARATOR) {
    s.push(MAIN_SEPARATOR);
  }
  s
}

/// Lexically normalize and append a trailing separator, the shape every
/// project root takes on the wire.
fn clean(path: &str) -> String {
  let mut cleaned = PathBuf::new();
  for component in Path::new(path).components() {
    match component {
      std::path::Component::CurDir => {}
      std::path::Component::ParentDir => {
        cleaned.pop();
      }
      _ => cleaned.push(component.as_os_str()),
    }
  }
  with_trailing_separator(&cleaned)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pogo_plugin::ErrorBody;

  fn decode_error(encoded: &str) -> ErrorBody {
    let decoded = urlencoding::decode(encoded).unwrap();
    serde_json::from_str(&decoded).unwrap()
  }

  #[test]
  fn test_clean_appends_separator() {
    assert_eq!(clean("/a/b"), "/a/b/");
    assert_eq!(clean("/a/b/"), "/a/b/");
    assert_eq!(clean("/a/./b/../b"), "/a/b/");
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_execute_unknown_type_is_404() {
    let engine = SearchEngine::spawn();
    let req = urlencoding::encode(r#"{"type":"frobnicate"}"#).into_owned();
    let body = decode_error(&engine.execute(&req).await);
    assert_eq!(body.error_code, 404);
    assert_eq!(body.error, "Unknown request type.");
    engine.shutdown();
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_execute_invalid_json_is_400() {
    let engine = SearchEngine::spawn();
    let req = urlencoding::encode("{not json").into_owned();
    let body = decode_error(&engine.execute(&req).await);
    assert_eq!(body.error_code, 400);
    assert_eq!(body.error, "Invalid request.");
    engine.shutdown();
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_execute_undecodable_payload_is_500() {
    let engine = SearchEngine::spawn();
    let body = decode_error(&engine.execute("%FF").await);
    assert_eq!(body.error_code, 500);
    assert_eq!(body.error, "Could not query decode request.");
    engine.shutdown();
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_search_unknown_project() {
    let engine = SearchEngine::spawn();
    let err = engine.search("/nowhere/", "query", "").await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownProject(_)));
    engine.shutdown();
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_get_files_unknown_project() {
    let engine = SearchEngine::spawn();
    let err = engine.get_files("/nowhere/").unwrap_err();
    assert!(matches!(err, EngineError::UnknownProject(_)));
    engine.shutdown();
  }
}
