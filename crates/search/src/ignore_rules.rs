//! Ignore-rule matching against paths relative to a project root.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, MAIN_SEPARATOR};
use tracing::warn;

/// Compiled ignore rules for one project root.
///
/// Only the root-level `.gitignore` is consulted. A missing or unparseable
/// file yields a matcher that rejects nothing. `.git` and `.pogo` are not
/// the matcher's concern; the walk excludes them unconditionally.
pub struct IgnoreRules {
  matcher: Gitignore,
}

impl IgnoreRules {
  pub fn parse(root: &Path) -> Self {
    let ignore_file = root.join(".gitignore");
    if !ignore_file.is_file() {
      return Self {
        matcher: Gitignore::empty(),
      };
    }

    let mut builder = GitignoreBuilder::new(root);
    if let Some(e) = builder.add(&ignore_file) {
      warn!("Error parsing {:?}: {e}", ignore_file);
      return Self {
        matcher: Gitignore::empty(),
      };
    }
    match builder.build() {
      Ok(matcher) => Self { matcher },
      Err(e) => {
        warn!("Error compiling ignore rules for {:?}: {e}", root);
        Self {
          matcher: Gitignore::empty(),
        }
      }
    }
  }

  /// Whether `relative` (path under the project root) is ignore-matched.
  pub fn is_ignored(&self, relative: &str, is_dir: bool) -> bool {
    let rel = relative.trim_start_matches(MAIN_SEPARATOR);
    self.matcher.matched(rel, is_dir).is_ignore()
  }

  /// Like [`Self::is_ignored`], but a match on any enclosing directory
  /// counts too. Used when a walk starts inside a subtree instead of
  /// pruning down from the root.
  pub fn is_ignored_with_parents(&self, relative: &str, is_dir: bool) -> bool {
    let rel = relative.trim_start_matches(MAIN_SEPARATOR);
    self.matcher.matched_path_or_any_parents(rel, is_dir).is_ignore()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_missing_gitignore_matches_nothing() {
    let dir = TempDir::new().unwrap();
    let rules = IgnoreRules::parse(dir.path());
    assert!(!rules.is_ignored("src/main.rs", false));
    assert!(!rules.is_ignored("target", true));
  }

  #[test]
  fn test_patterns_match_relative_paths() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".gitignore"), "*.o\nbuild/\n").unwrap();
    let rules = IgnoreRules::parse(dir.path());

    assert!(rules.is_ignored("src/a.o", false));
    assert!(rules.is_ignored("build", true));
    assert!(!rules.is_ignored("src/a.c", false));
  }

  #[test]
  fn test_leading_separator_stripped() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
    let rules = IgnoreRules::parse(dir.path());
    assert!(rules.is_ignored("/debug.log", false));
  }

  #[test]
  fn test_negated_pattern_is_not_ignored() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".gitignore"), "*.log\n!keep.log\n").unwrap();
    let rules = IgnoreRules::parse(dir.path());
    assert!(rules.is_ignored("debug.log", false));
    assert!(!rules.is_ignored("keep.log", false));
  }
}
