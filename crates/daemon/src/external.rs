//! A plugin child process: spawn, handshake, checksum pinning, and
//! synchronous JSON-RPC over its stdio.

use pogo_plugin::{parse_handshake, ProtocolError, RpcRequest, RpcResponse, HANDSHAKE_KEY, HANDSHAKE_VALUE};
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// How long to wait for the handshake line after spawning.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
/// Per-call RPC timeout.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ExternalError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Protocol error: {0}")]
  Protocol(#[from] ProtocolError),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Plugin closed its stdout")]
  Eof,
  #[error("Timeout waiting for plugin response")]
  Timeout,
  #[error("Response id mismatch: expected {expected}, got {got}")]
  IdMismatch { expected: u64, got: u64 },
  #[error("Checksum mismatch for {path}: pinned {pinned}, found {actual}")]
  ChecksumMismatch {
    path: String,
    pinned: String,
    actual: String,
  },
  #[error("Plugin error {code}: {message}")]
  Rpc { code: i64, message: String },
}

/// A supervised plugin child. Cheap to clone; all clones talk to the same
/// process.
#[derive(Clone, Debug)]
pub struct ExternalPlugin {
  path: PathBuf,
  checksum: String,
  child: Arc<Mutex<Child>>,
  stdin: Arc<Mutex<ChildStdin>>,
  stdout: Arc<Mutex<BufReader<ChildStdout>>>,
  next_id: Arc<AtomicU64>,
}

impl ExternalPlugin {
  /// Re-hash the executable immediately before spawning and reject it if
  /// the hash no longer matches `pinned_checksum` (the value recorded at
  /// discovery), then launch with the magic cookie in the environment and
  /// complete the handshake. No RPC may happen before this returns.
  pub fn launch(path: &Path, pinned_checksum: &str) -> Result<Self, ExternalError> {
    let checksum = sha256_file(path)?;
    if checksum != pinned_checksum {
      return Err(ExternalError::ChecksumMismatch {
        path: path.to_string_lossy().into_owned(),
        pinned: pinned_checksum.to_string(),
        actual: checksum,
      });
    }
    debug!("Launching plugin {:?} (sha256 {checksum})", path);

    let mut child = Command::new(path)
      .env(HANDSHAKE_KEY, HANDSHAKE_VALUE)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .spawn()?;

    let stdin = child
      .stdin
      .take()
      .ok_or_else(|| ExternalError::Protocol(ProtocolError::Handshake("no stdin pipe".to_string())))?;
    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| ExternalError::Protocol(ProtocolError::Handshake("no stdout pipe".to_string())))?;

    let plugin = Self {
      path: path.to_path_buf(),
      checksum,
      child: Arc::new(Mutex::new(child)),
      stdin: Arc::new(Mutex::new(stdin)),
      stdout: Arc::new(Mutex::new(BufReader::new(stdout))),
      next_id: Arc::new(AtomicU64::new(1)),
    };

    let line = read_line_with_timeout(&plugin.stdout, HANDSHAKE_TIMEOUT).map_err(|e| {
      plugin.kill();
      e
    })?;
    if let Err(e) = parse_handshake(&line) {
      plugin.kill();
      return Err(e.into());
    }
    Ok(plugin)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// SHA-256 the binary was verified against at launch. Relaunches pin to
  /// this same value.
  pub fn checksum(&self) -> &str {
    &self.checksum
  }

  /// Whether the child process is still running.
  pub fn is_alive(&self) -> bool {
    let mut child = match self.child.lock() {
      Ok(child) => child,
      Err(poisoned) => poisoned.into_inner(),
    };
    matches!(child.try_wait(), Ok(None))
  }

  pub fn kill(&self) {
    let mut child = match self.child.lock() {
      Ok(child) => child,
      Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(e) = child.kill() {
      debug!("Kill {:?}: {e}", self.path);
    }
    let _ = child.wait();
  }

  /// One synchronous request/response round-trip.
  pub fn call(
    &self,
    method: &str,
    params: Option<serde_json::Value>,
    timeout: Duration,
  ) -> Result<RpcResponse, ExternalError> {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let request = RpcRequest::new(id, method, params);
    let json = serde_json::to_string(&request)?;

    {
      let mut stdin = match self.stdin.lock() {
        Ok(stdin) => stdin,
        Err(poisoned) => poisoned.into_inner(),
      };
      writeln!(stdin, "{json}")?;
      stdin.flush()?;
    }

    let line = read_line_with_timeout(&self.stdout, timeout)?;
    let response: RpcResponse = serde_json::from_str(&line)?;
    if response.id != id {
      return Err(ExternalError::IdMismatch {
        expected: id,
        got: response.id,
      });
    }
    Ok(response)
  }

  /// Like [`Self::call`], but unwraps the result or surfaces the RPC error.
  pub fn call_expecting_result(
    &self,
    method: &str,
    params: Option<serde_json::Value>,
    timeout: Duration,
  ) -> Result<serde_json::Value, ExternalError> {
    let response = self.call(method, params, timeout)?;
    if let Some(err) = response.error {
      return Err(ExternalError::Rpc {
        code: err.code,
        message: err.message,
      });
    }
    Ok(response.result.unwrap_or(serde_json::Value::Null))
  }
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
  let mut file = std::fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];
  loop {
    let n = file.read(&mut buffer)?;
    if n == 0 {
      break;
    }
    hasher.update(&buffer[..n]);
  }
  Ok(format!("{:x}", hasher.finalize()))
}

/// Read one line from the child's stdout, bounded by `timeout`.
///
/// A blocking reader thread feeds a channel; on timeout the thread is
/// abandoned (it exits on its own once the child dies or speaks).
fn read_line_with_timeout(
  stdout: &Arc<Mutex<BufReader<ChildStdout>>>,
  timeout: Duration,
) -> Result<String, ExternalError> {
  let stdout = Arc::clone(stdout);
  let (tx, rx) = std::sync::mpsc::channel();

  std::thread::spawn(move || {
    let result = (|| -> Result<String, ExternalError> {
      let mut reader = match stdout.lock() {
        Ok(reader) => reader,
        Err(poisoned) => poisoned.into_inner(),
      };
      let mut line = String::new();
      match reader.read_line(&mut line) {
        Ok(0) => Err(ExternalError::Eof),
        Ok(_) => Ok(line.trim().to_string()),
        Err(e) => Err(ExternalError::Io(e)),
      }
    })();
    let _ = tx.send(result);
  });

  match rx.recv_timeout(timeout) {
    Ok(result) => result,
    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
      warn!("Timeout waiting for plugin response");
      Err(ExternalError::Timeout)
    }
    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Err(ExternalError::Eof),
  }
}
