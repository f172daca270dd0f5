pub mod rpc;
pub mod serve;
pub mod wire;

pub use rpc::{error_codes, RpcError, RpcRequest, RpcResponse};
pub use serve::serve;
pub use wire::{
  encode_error, ChunkMatch, DataObject, ErrorBody, FileMatch, IndexedProject, PluginInfo, ProcessProjectRequest,
  SearchRequest, SearchResponse, SearchResults,
};

use thiserror::Error;

/// API version reported by the search plugin.
pub const API_VERSION: &str = "0.0.1";

/// Protocol version exchanged during the handshake.
pub const PROTOCOL_VERSION: u32 = 2;

/// Environment variable carrying the magic cookie to plugin children.
///
/// The cookie is a UX guard against launching a binary that is not a pogo
/// plugin, not a security boundary.
pub const HANDSHAKE_KEY: &str = "SEARCH_PLUGIN";
pub const HANDSHAKE_VALUE: &str = "93f6bc9f97c03ed00fa85c904aca15a92752e549";

#[derive(Error, Debug)]
pub enum ProtocolError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Handshake failed: {0}")]
  Handshake(String),
  #[error("Plugin error {code}: {message}")]
  Rpc { code: i64, message: String },
}

/// The interface a search plugin implements.
///
/// `execute` takes and returns URL-encoded JSON so the transport never has
/// to parse payloads. `process_project` must return promptly; indexing work
/// is scheduled in the background.
pub trait SearchPlugin: Send + Sync + 'static {
  fn info(&self) -> PluginInfo;

  fn execute(&self, request: &str) -> impl std::future::Future<Output = String> + Send;

  fn process_project(
    &self,
    request: &ProcessProjectRequest,
  ) -> impl std::future::Future<Output = Result<(), ProtocolError>> + Send;
}

/// The line a plugin child prints on stdout before serving RPC.
pub fn handshake_line() -> String {
  format!("pogo|{}|{}", PROTOCOL_VERSION, HANDSHAKE_VALUE)
}

/// Validate a handshake line received from a plugin child.
pub fn parse_handshake(line: &str) -> Result<(), ProtocolError> {
  let mut parts = line.trim().splitn(3, '|');
  let magic = parts.next().unwrap_or_default();
  let version = parts.next().unwrap_or_default();
  let cookie = parts.next().unwrap_or_default();

  if magic != "pogo" {
    return Err(ProtocolError::Handshake(format!("unexpected preamble {magic:?}")));
  }
  match version.parse::<u32>() {
    Ok(v) if v == PROTOCOL_VERSION => {}
    Ok(v) => {
      return Err(ProtocolError::Handshake(format!(
        "protocol version mismatch: daemon speaks {PROTOCOL_VERSION}, plugin speaks {v}"
      )));
    }
    Err(_) => return Err(ProtocolError::Handshake("malformed protocol version".to_string())),
  }
  if cookie != HANDSHAKE_VALUE {
    return Err(ProtocolError::Handshake("magic cookie mismatch".to_string()));
  }
  Ok(())
}

/// Check the handshake cookie in the child's environment.
///
/// Plugins call this first thing in main and exit non-zero on failure, so a
/// plugin binary run by hand fails fast instead of waiting on stdin.
pub fn verify_cookie_env() -> Result<(), ProtocolError> {
  match std::env::var(HANDSHAKE_KEY) {
    Ok(v) if v == HANDSHAKE_VALUE => Ok(()),
    Ok(_) => Err(ProtocolError::Handshake("magic cookie mismatch".to_string())),
    Err(_) => Err(ProtocolError::Handshake(format!(
      "this binary is a pogo plugin and is not meant to be executed directly ({HANDSHAKE_KEY} not set)"
    ))),
  }
}
