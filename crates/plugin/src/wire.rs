//! JSON shapes shared by the daemon, the plugins, and the CLI.

use serde::{Deserialize, Serialize};

/// Envelope used by the daemon to route a URL-encoded payload to a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataObject {
  #[serde(default)]
  pub plugin: String,
  #[serde(default)]
  pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
  pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessProjectRequest {
  pub path: String,
}

/// Payload of an `execute` call, URL-encoded JSON on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
  /// `"search"` or `"files"`.
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(rename = "projectRoot", default)]
  pub project_root: String,
  /// Search timeout, e.g. `"10s"`. Clients send this field under the JSON
  /// key `"string"`; the wire name cannot change without breaking them.
  #[serde(rename = "string", default)]
  pub duration: String,
  #[serde(default)]
  pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMatch {
  pub line: u32,
  pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMatch {
  pub path: String,
  pub matches: Vec<ChunkMatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
  /// `None` serializes as `null`, matching what file-listing responses carry.
  pub files: Option<Vec<FileMatch>>,
}

/// A project as the indexer sees it: the absolute root (trailing separator)
/// and the indexed file paths relative to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedProject {
  pub root: String,
  pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
  pub index: IndexedProject,
  pub results: SearchResults,
  pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
  #[serde(rename = "errorCode")]
  pub error_code: i32,
  pub error: String,
}

impl SearchResponse {
  pub fn with_index(index: IndexedProject) -> Self {
    Self {
      index,
      ..Self::default()
    }
  }

  pub fn with_results(results: SearchResults) -> Self {
    Self {
      results,
      ..Self::default()
    }
  }

  /// URL-encoded JSON, the form `execute` returns on success.
  pub fn encode(&self) -> String {
    match serde_json::to_string(self) {
      Ok(json) => urlencoding::encode(&json).into_owned(),
      Err(e) => {
        tracing::error!("Error writing search response: {e}");
        encode_error(500, "Error writing search response.")
      }
    }
  }
}

/// URL-encoded `{errorCode, error}` body, the form `execute` returns on
/// failure.
pub fn encode_error(code: i32, message: &str) -> String {
  let body = ErrorBody {
    error_code: code,
    error: message.to_string(),
  };
  // ErrorBody serialization cannot fail: two plain fields.
  let json = serde_json::to_string(&body).unwrap_or_default();
  urlencoding::encode(&json).into_owned()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_search_request_wire_names() {
    let req = SearchRequest {
      kind: "search".to_string(),
      project_root: "/home/user/proj/".to_string(),
      duration: "10s".to_string(),
      data: "query".to_string(),
    };
    let json = serde_json::to_string(&req).unwrap();
    assert!(json.contains("\"type\":\"search\""));
    assert!(json.contains("\"projectRoot\""));
    // Historical wire name for the timeout field.
    assert!(json.contains("\"string\":\"10s\""));
    assert!(!json.contains("\"duration\""));
  }

  #[test]
  fn test_search_request_defaults() {
    let req: SearchRequest = serde_json::from_str(r#"{"type":"files"}"#).unwrap();
    assert_eq!(req.kind, "files");
    assert!(req.project_root.is_empty());
    assert!(req.duration.is_empty());
  }

  #[test]
  fn test_empty_results_serialize_null() {
    let resp = SearchResponse::with_index(IndexedProject {
      root: "/p/".to_string(),
      paths: vec!["a.c".to_string()],
    });
    let json = serde_json::to_string(&resp).unwrap();
    assert!(json.contains("\"files\":null"));
  }

  #[test]
  fn test_error_body_encoding() {
    let encoded = encode_error(404, "Unknown request type.");
    let decoded = urlencoding::decode(&encoded).unwrap();
    let body: ErrorBody = serde_json::from_str(&decoded).unwrap();
    assert_eq!(body.error_code, 404);
    assert_eq!(body.error, "Unknown request type.");
  }

  #[test]
  fn test_search_response_encode_roundtrip() {
    let resp = SearchResponse::with_results(SearchResults {
      files: Some(vec![FileMatch {
        path: "src/a.c".to_string(),
        matches: vec![ChunkMatch {
          line: 2,
          content: "// Example query".to_string(),
        }],
      }]),
    });
    let decoded = urlencoding::decode(&resp.encode()).unwrap().into_owned();
    let parsed: SearchResponse = serde_json::from_str(&decoded).unwrap();
    let files = parsed.results.files.unwrap();
    assert_eq!(files[0].matches[0].line, 2);
    assert_eq!(files[0].matches[0].content, "// Example query");
  }
}
