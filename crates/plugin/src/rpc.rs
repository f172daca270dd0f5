//! JSON-RPC envelopes for stdio communication with plugin children.
//!
//! The daemon writes requests to the child's stdin and reads responses from
//! its stdout, one JSON object per line.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
  pub id: u64,
  pub method: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
  pub id: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
  pub code: i64,
  pub message: String,
}

pub mod error_codes {
  pub const PARSE_ERROR: i64 = -32700;
  pub const METHOD_NOT_FOUND: i64 = -32601;
  pub const INVALID_PARAMS: i64 = -32602;
  pub const INTERNAL_ERROR: i64 = -32603;
}

impl RpcRequest {
  pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
    Self {
      id,
      method: method.to_string(),
      params,
    }
  }
}

impl RpcResponse {
  pub fn success(id: u64, result: serde_json::Value) -> Self {
    Self {
      id,
      result: Some(result),
      error: None,
    }
  }

  pub fn error(id: u64, code: i64, message: &str) -> Self {
    Self {
      id,
      result: None,
      error: Some(RpcError {
        code,
        message: message.to_string(),
      }),
    }
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_request_without_params_omits_field() {
    let req = RpcRequest::new(1, "info", None);
    let serialized = serde_json::to_string(&req).unwrap();
    assert!(!serialized.contains("params"));
  }

  #[test]
  fn test_success_response_roundtrip() {
    let resp = RpcResponse::success(7, json!({"version": "0.0.1"}));
    let parsed: RpcResponse = serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
    assert_eq!(parsed.id, 7);
    assert!(!parsed.is_error());
    assert_eq!(parsed.result.unwrap()["version"], "0.0.1");
  }

  #[test]
  fn test_error_response_roundtrip() {
    let resp = RpcResponse::error(2, error_codes::METHOD_NOT_FOUND, "unknown method");
    let parsed: RpcResponse = serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
    assert!(parsed.is_error());
    let err = parsed.error.unwrap();
    assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    assert_eq!(err.message, "unknown method");
  }
}
