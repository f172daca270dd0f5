//! On-disk state for an indexed project: the JSON sidecar listing indexed
//! paths and the code-search index the external library owns.

use crate::engine::EngineError;
use pogo_plugin::{ChunkMatch, FileMatch, IndexedProject, SearchResults};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, Value, STORED, TEXT};
use tantivy::{doc, Index, IndexWriter, TantivyDocument};
use tracing::{info, warn};

const POGO_DIR: &str = ".pogo";
const SEARCH_DIR: &str = "search";
const SIDECAR_FILE: &str = "search_index.json";
const CODE_INDEX_DIR: &str = "code_search_index";

/// Cap on files returned per query.
const MAX_RESULTS: usize = 100;

const WRITER_HEAP_BYTES: usize = 15_000_000;

/// Ensure `<root>/.pogo/search` exists and return it.
pub fn make_search_dir(root: &str) -> std::io::Result<PathBuf> {
  let dir = Path::new(root).join(POGO_DIR).join(SEARCH_DIR);
  std::fs::create_dir_all(&dir)?;
  Ok(dir)
}

pub fn sidecar_path(root: &str) -> PathBuf {
  Path::new(root).join(POGO_DIR).join(SEARCH_DIR).join(SIDECAR_FILE)
}

pub fn code_index_dir(root: &str) -> PathBuf {
  Path::new(root).join(POGO_DIR).join(SEARCH_DIR).join(CODE_INDEX_DIR)
}

pub fn write_sidecar(project: &IndexedProject) -> Result<(), EngineError> {
  make_search_dir(&project.root)?;
  let bytes = serde_json::to_vec(project)?;
  std::fs::write(sidecar_path(&project.root), bytes)?;
  info!("Indexed {} files for {}", project.paths.len(), project.root);
  Ok(())
}

pub fn load_sidecar(root: &str) -> Result<IndexedProject, EngineError> {
  let bytes = std::fs::read(sidecar_path(root))?;
  Ok(serde_json::from_slice(&bytes)?)
}

fn schema() -> (Schema, tantivy::schema::Field, tantivy::schema::Field) {
  let mut builder = Schema::builder();
  let path = builder.add_text_field("path", TEXT | STORED);
  let content = builder.add_text_field("content", TEXT | STORED);
  (builder.build(), path, content)
}

/// Rebuild the code-search index from the project's current path list.
///
/// The index is recreated from scratch on every commit; files that vanished
/// since the walk are logged and skipped.
pub fn build_code_index(project: &IndexedProject) -> Result<(), EngineError> {
  make_search_dir(&project.root)?;
  let dir = code_index_dir(&project.root);
  if dir.exists() {
    std::fs::remove_dir_all(&dir)?;
  }
  std::fs::create_dir_all(&dir)?;

  let (schema, path_field, content_field) = schema();
  let index = Index::create_in_dir(&dir, schema).map_err(|e| EngineError::Index(e.to_string()))?;
  let mut writer: IndexWriter = index
    .writer(WRITER_HEAP_BYTES)
    .map_err(|e| EngineError::Index(e.to_string()))?;

  for rel in &project.paths {
    let full = Path::new(&project.root).join(rel);
    let content = match std::fs::read_to_string(&full) {
      Ok(content) => content,
      Err(e) => {
        warn!("Error reading file {:?}: {e}", full);
        continue;
      }
    };
    writer
      .add_document(doc!(path_field => rel.clone(), content_field => content))
      .map_err(|e| EngineError::Index(e.to_string()))?;
  }

  writer.commit().map_err(|e| EngineError::Index(e.to_string()))?;
  Ok(())
}

/// Run `query` against the project's code-search index.
///
/// `cancelled` is the deadline's reach into this blocking call: it is
/// checked between phases and per matched document, so a timed-out query
/// stops at its next checkpoint instead of running to completion. The
/// collector pass inside `Searcher::search` is the one stretch that cannot
/// be interrupted.
pub fn run_search(root: &str, query: &str, cancelled: &AtomicBool) -> Result<SearchResults, EngineError> {
  let dir = code_index_dir(root);
  let index = Index::open_in_dir(&dir).map_err(|e| EngineError::Index(e.to_string()))?;
  let schema = index.schema();
  let path_field = schema
    .get_field("path")
    .map_err(|e| EngineError::Index(e.to_string()))?;
  let content_field = schema
    .get_field("content")
    .map_err(|e| EngineError::Index(e.to_string()))?;

  if cancelled.load(Ordering::Relaxed) {
    return Err(EngineError::Timeout);
  }
  let parser = QueryParser::for_index(&index, vec![content_field]);
  let parsed = parser
    .parse_query(query)
    .map_err(|e| EngineError::QueryParse(e.to_string()))?;

  let reader = index.reader().map_err(|e| EngineError::Index(e.to_string()))?;
  let searcher = reader.searcher();
  if cancelled.load(Ordering::Relaxed) {
    return Err(EngineError::Timeout);
  }
  let top_docs = searcher
    .search(&parsed, &TopDocs::with_limit(MAX_RESULTS))
    .map_err(|e| EngineError::Index(e.to_string()))?;

  let mut files = Vec::with_capacity(top_docs.len());
  for (_score, address) in top_docs {
    if cancelled.load(Ordering::Relaxed) {
      return Err(EngineError::Timeout);
    }
    let document: TantivyDocument = searcher.doc(address).map_err(|e| EngineError::Index(e.to_string()))?;
    let path = document
      .get_first(path_field)
      .and_then(|v| v.as_str())
      .unwrap_or_default()
      .to_string();
    let content = document.get_first(content_field).and_then(|v| v.as_str()).unwrap_or("");
    files.push(FileMatch {
      path,
      matches: line_matches(content, query),
    });
  }

  Ok(SearchResults { files: Some(files) })
}

/// Per-line matches within a matched file: every line containing one of the
/// query's terms, 1-based, with the line's text as the match content.
fn line_matches(content: &str, query: &str) -> Vec<ChunkMatch> {
  let lowered = query.to_lowercase();
  let mut terms: Vec<&str> = lowered.split_whitespace().collect();
  terms.sort_unstable();
  terms.dedup();
  if terms.is_empty() {
    return Vec::new();
  }

  let mut matches = Vec::new();
  for (idx, line) in content.lines().enumerate() {
    let line_lower = line.to_lowercase();
    if terms.iter().any(|term| line_lower.contains(term)) {
      matches.push(ChunkMatch {
        line: idx as u32 + 1,
        content: line.trim().to_string(),
      });
    }
  }
  matches
}

/// Parse the short-form duration grammar the wire uses: `"10s"`, `"500ms"`,
/// `"1m30s"`. Units: ns, us, ms, s, m, h.
pub fn parse_duration(input: &str) -> Option<Duration> {
  let s = input.trim();
  if s.is_empty() {
    return None;
  }

  let mut total = Duration::ZERO;
  let mut rest = s;
  while !rest.is_empty() {
    let digits_end = rest.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    if digits_end == 0 {
      return None;
    }
    let (number, tail) = rest.split_at(digits_end);
    let value: f64 = number.parse().ok()?;

    let unit_end = tail.find(|c: char| c.is_ascii_digit()).unwrap_or(tail.len());
    let (unit, tail) = tail.split_at(unit_end);
    let unit_secs = match unit {
      "ns" => 1e-9,
      "us" => 1e-6,
      "ms" => 1e-3,
      "s" => 1.0,
      "m" => 60.0,
      "h" => 3600.0,
      _ => return None,
    };

    total += Duration::from_secs_f64(value * unit_secs);
    rest = tail;
  }
  Some(total)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn fixture() -> (TempDir, String) {
    let tmp = TempDir::new().unwrap();
    let root = format!("{}/", tmp.path().to_string_lossy());
    std::fs::create_dir_all(tmp.path().join("src")).unwrap();
    std::fs::write(
      tmp.path().join("src/a.c"),
      "int main() {\n  // Example query\n  return 0;\n}\n",
    )
    .unwrap();
    std::fs::write(
      tmp.path().join("README.md"),
      "# a-service\n\nIt will contain code to query.\n",
    )
    .unwrap();
    (tmp, root)
  }

  fn indexed(root: &str) -> IndexedProject {
    IndexedProject {
      root: root.to_string(),
      paths: vec!["src/a.c".to_string(), "README.md".to_string()],
    }
  }

  #[test]
  fn test_sidecar_roundtrip() {
    let (_tmp, root) = fixture();
    let project = indexed(&root);
    write_sidecar(&project).unwrap();
    let loaded = load_sidecar(&root).unwrap();
    assert_eq!(loaded, project);
  }

  fn search_uncancelled(root: &str, query: &str) -> Result<SearchResults, EngineError> {
    run_search(root, query, &AtomicBool::new(false))
  }

  #[test]
  fn test_build_and_search_index() {
    let (_tmp, root) = fixture();
    let project = indexed(&root);
    build_code_index(&project).unwrap();

    let results = search_uncancelled(&root, "query").unwrap();
    let files = results.files.unwrap();
    assert_eq!(files.len(), 2);

    let a_c = files.iter().find(|f| f.path == "src/a.c").unwrap();
    assert_eq!(a_c.matches.len(), 1);
    assert_eq!(a_c.matches[0].line, 2);
    assert_eq!(a_c.matches[0].content, "// Example query");

    let readme = files.iter().find(|f| f.path == "README.md").unwrap();
    assert_eq!(readme.matches[0].line, 3);
    assert_eq!(readme.matches[0].content, "It will contain code to query.");
  }

  #[test]
  fn test_build_skips_vanished_files() {
    let (_tmp, root) = fixture();
    let mut project = indexed(&root);
    project.paths.push("gone.c".to_string());
    // Missing file is logged and skipped, the rest still indexes.
    build_code_index(&project).unwrap();
    let results = search_uncancelled(&root, "query").unwrap();
    assert_eq!(results.files.unwrap().len(), 2);
  }

  #[test]
  fn test_search_unparseable_query() {
    let (_tmp, root) = fixture();
    build_code_index(&indexed(&root)).unwrap();
    let err = search_uncancelled(&root, "AND AND (").unwrap_err();
    assert!(matches!(err, EngineError::QueryParse(_)));
  }

  #[test]
  fn test_search_stops_when_cancelled() {
    let (_tmp, root) = fixture();
    build_code_index(&indexed(&root)).unwrap();
    let err = run_search(&root, "query", &AtomicBool::new(true)).unwrap_err();
    assert!(matches!(err, EngineError::Timeout));
  }

  #[test]
  fn test_parse_duration_grammar() {
    assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
    assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
    assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
    assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
    assert_eq!(parse_duration(""), None);
    assert_eq!(parse_duration("banana"), None);
    assert_eq!(parse_duration("10"), None);
  }

  #[test]
  fn test_line_matches_multiple_terms() {
    let matches = line_matches("alpha\nbeta gamma\ngamma\n", "beta gamma");
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].line, 2);
    assert_eq!(matches[1].line, 3);
  }
}
