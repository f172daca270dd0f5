//! Environment-derived paths and path normalization helpers.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Directory holding the registry save file. `$POGO_HOME`, default `.`.
pub fn home_dir() -> PathBuf {
  match std::env::var("POGO_HOME") {
    Ok(home) if !home.is_empty() => PathBuf::from(home),
    _ => PathBuf::from("."),
  }
}

/// Location of the registry save file.
pub fn projects_file() -> PathBuf {
  home_dir().join("projects.json")
}

/// Directory scanned for plugin executables. `$POGO_PLUGIN_PATH`, default
/// the working directory.
pub fn plugin_dir() -> PathBuf {
  match std::env::var("POGO_PLUGIN_PATH") {
    Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
    _ => PathBuf::from("."),
  }
}

/// Address the daemon's HTTP surface listens on.
pub fn listen_addr() -> &'static str {
  "127.0.0.1:10000"
}

/// PID lock file in the system temp directory.
pub fn pid_file_path() -> PathBuf {
  std::env::temp_dir().join("pogo.pid")
}

/// Lexically normalize `path` and append a trailing separator if missing.
///
/// Mirrors what every path entering the registry goes through: `.` and `..`
/// segments collapse, repeated separators disappear, and directories always
/// compare with their trailing separator present.
pub fn clean(path: &str) -> String {
  let normalized = normalize_lexical(Path::new(path));
  with_trailing_separator(&normalized)
}

/// Collapse `.`/`..` components without touching the filesystem.
pub fn normalize_lexical(path: &Path) -> PathBuf {
  let mut cleaned = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        cleaned.pop();
      }
      Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
        cleaned.push(component.as_os_str());
      }
    }
  }
  if cleaned.as_os_str().is_empty() {
    cleaned.push(".");
  }
  cleaned
}

pub fn with_trailing_separator(path: &Path) -> String {
  let mut s = path.to_string_lossy().into_owned();
  if !s.ends_with(MAIN_SEPARATOR) {
    s.push(MAIN_SEPARATOR);
  }
  s
}
