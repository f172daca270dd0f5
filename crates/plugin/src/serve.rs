//! Child-side serve loop: handshake on stdout, then newline-delimited
//! JSON-RPC until stdin closes.

use crate::rpc::{error_codes, RpcRequest, RpcResponse};
use crate::wire::ProcessProjectRequest;
use crate::{handshake_line, ProtocolError, SearchPlugin};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// Serve `plugin` over stdin/stdout. Returns when stdin reaches EOF, which
/// is how the daemon tells a child to go away.
pub async fn serve<P: SearchPlugin>(plugin: P) -> Result<(), ProtocolError> {
  let mut stdout = tokio::io::stdout();
  stdout.write_all(handshake_line().as_bytes()).await?;
  stdout.write_all(b"\n").await?;
  stdout.flush().await?;

  let mut reader = BufReader::new(tokio::io::stdin());
  let mut line = String::new();

  loop {
    line.clear();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
      debug!("stdin closed, shutting down");
      return Ok(());
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let response = match serde_json::from_str::<RpcRequest>(trimmed) {
      Ok(request) => dispatch(&plugin, request).await,
      Err(e) => {
        warn!("Invalid request JSON: {e}");
        RpcResponse::error(0, error_codes::PARSE_ERROR, &format!("parse error: {e}"))
      }
    };

    let json = serde_json::to_string(&response)?;
    stdout.write_all(json.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
  }
}

async fn dispatch<P: SearchPlugin>(plugin: &P, request: RpcRequest) -> RpcResponse {
  match request.method.as_str() {
    "info" => match serde_json::to_value(plugin.info()) {
      Ok(value) => RpcResponse::success(request.id, value),
      Err(e) => RpcResponse::error(request.id, error_codes::INTERNAL_ERROR, &e.to_string()),
    },
    "execute" => {
      let payload = request
        .params
        .as_ref()
        .and_then(|p| p.as_str())
        .unwrap_or_default()
        .to_string();
      let result = plugin.execute(&payload).await;
      RpcResponse::success(request.id, serde_json::Value::String(result))
    }
    "process_project" => {
      let params = request.params.clone().unwrap_or_default();
      match serde_json::from_value::<ProcessProjectRequest>(params) {
        Ok(req) => match plugin.process_project(&req).await {
          Ok(()) => RpcResponse::success(request.id, serde_json::json!({ "ok": true })),
          Err(e) => RpcResponse::error(request.id, error_codes::INTERNAL_ERROR, &e.to_string()),
        },
        Err(e) => RpcResponse::error(request.id, error_codes::INVALID_PARAMS, &format!("bad params: {e}")),
      }
    }
    other => RpcResponse::error(
      request.id,
      error_codes::METHOD_NOT_FOUND,
      &format!("unknown method {other:?}"),
    ),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::wire::PluginInfo;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  struct EchoPlugin {
    processed: Arc<AtomicUsize>,
  }

  impl SearchPlugin for EchoPlugin {
    fn info(&self) -> PluginInfo {
      PluginInfo {
        version: crate::API_VERSION.to_string(),
      }
    }

    async fn execute(&self, request: &str) -> String {
      format!("echo:{request}")
    }

    async fn process_project(&self, _request: &ProcessProjectRequest) -> Result<(), ProtocolError> {
      self.processed.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  fn echo() -> (EchoPlugin, Arc<AtomicUsize>) {
    let processed = Arc::new(AtomicUsize::new(0));
    (
      EchoPlugin {
        processed: Arc::clone(&processed),
      },
      processed,
    )
  }

  #[tokio::test]
  async fn test_dispatch_info() {
    let (plugin, _) = echo();
    let resp = dispatch(&plugin, RpcRequest::new(1, "info", None)).await;
    assert_eq!(resp.result.unwrap()["version"], crate::API_VERSION);
  }

  #[tokio::test]
  async fn test_dispatch_execute_passes_payload() {
    let (plugin, _) = echo();
    let req = RpcRequest::new(2, "execute", Some(serde_json::json!("payload")));
    let resp = dispatch(&plugin, req).await;
    assert_eq!(resp.result.unwrap().as_str().unwrap(), "echo:payload");
  }

  #[tokio::test]
  async fn test_dispatch_process_project() {
    let (plugin, processed) = echo();
    let req = RpcRequest::new(3, "process_project", Some(serde_json::json!({"path": "/p/"})));
    let resp = dispatch(&plugin, req).await;
    assert!(!resp.is_error());
    assert_eq!(processed.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_dispatch_unknown_method() {
    let (plugin, _) = echo();
    let resp = dispatch(&plugin, RpcRequest::new(4, "frobnicate", None)).await;
    assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
  }
}
