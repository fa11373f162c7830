//! mpv JSON IPC client.
//!
//! One connection per request: connect, write a single newline-terminated
//! command, read lines until the reply arrives, close. Every failure mode
//! (missing socket, refused connection, timeout, malformed reply) degrades to
//! a safe default and a log line.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use crate::constants::constants;

#[derive(Debug, Clone)]
pub struct IpcClient {
  socket_path: PathBuf,
  timeout: Duration,
}

impl IpcClient {
  pub fn new(socket_path: impl Into<PathBuf>) -> Self {
    Self { socket_path: socket_path.into(), timeout: constants().ipc_timeout() }
  }

  async fn connect(&self) -> Result<UnixStream> {
    if !self.socket_path.exists() {
      return Err(anyhow!("mpv IPC socket {} does not exist", self.socket_path.display()));
    }
    tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
      .await
      .context("Timeout connecting to mpv IPC socket")?
      .context("Failed to connect to mpv IPC socket")
  }

  /// Send `{"command": command}` and return the reply's `data` field, if any.
  pub async fn request(&self, command: Value) -> Result<Option<Value>> {
    let mut stream = self.connect().await?;
    let mut payload = serde_json::to_vec(&json!({ "command": command })).context("Failed to encode IPC command")?;
    payload.push(b'\n');
    tokio::time::timeout(self.timeout, stream.write_all(&payload))
      .await
      .context("Timeout writing to mpv IPC socket")?
      .context("Failed to send command to mpv IPC")?;

    let reader = TokioBufReader::new(stream);
    let mut lines = reader.lines();

    // mpv may interleave event lines before our reply.
    for _ in 0..constants().ipc_max_lines {
      let line = tokio::time::timeout(self.timeout, lines.next_line())
        .await
        .context("Timeout waiting for mpv IPC response")?
        .context("Failed to read from mpv IPC socket")?;

      let Some(line) = line else { break };
      let val: Value = serde_json::from_str(&line).with_context(|| format!("Malformed mpv IPC reply: {}", line))?;
      if val.get("event").is_some() {
        continue;
      }
      if let Some(err) = val.get("error").and_then(|v| v.as_str())
        && err != "success"
      {
        debug!(err = %err, "ipc: mpv reported an error");
      }
      return Ok(val.get("data").cloned());
    }

    Err(anyhow!("mpv IPC closed without a reply"))
  }

  /// Write a command without waiting for the reply.
  async fn send(&self, command: Value) -> Result<()> {
    let mut stream = self.connect().await?;
    let mut payload = serde_json::to_vec(&json!({ "command": command })).context("Failed to encode IPC command")?;
    payload.push(b'\n');
    tokio::time::timeout(self.timeout, stream.write_all(&payload))
      .await
      .context("Timeout writing to mpv IPC socket")?
      .context("Failed to send command to mpv IPC")?;
    let _ = stream.shutdown().await;
    Ok(())
  }

  pub async fn get_property(&self, name: &str) -> Option<Value> {
    match self.request(json!(["get_property", name])).await {
      Ok(data) => data,
      Err(e) => {
        debug!(property = name, err = %format!("{:#}", e), "ipc: get_property failed");
        None
      }
    }
  }

  pub async fn set_property(&self, name: &str, value: Value) {
    if let Err(e) = self.send(json!(["set_property", name, value])).await {
      warn!(property = name, err = %format!("{:#}", e), "ipc: set_property failed");
    }
  }

  pub async fn fullscreen(&self) -> bool {
    self.get_property("fullscreen").await.and_then(|v| v.as_bool()).unwrap_or(false)
  }

  pub async fn set_fullscreen(&self, fullscreen: bool) {
    self.set_property("fullscreen", Value::Bool(fullscreen)).await;
  }

  /// Current `time-pos` in seconds, or `None` if it could not be read.
  pub async fn try_playback_position(&self) -> Option<f64> {
    self.get_property("time-pos").await.and_then(|v| v.as_f64())
  }

  /// Current `time-pos` in seconds, `0.0` on any failure.
  #[allow(dead_code)]
  pub async fn playback_position(&self) -> f64 {
    self.try_playback_position().await.unwrap_or(0.0)
  }

  /// Poll for the socket to appear before reading the position. Absorbs the
  /// window between spawning mpv and mpv opening its IPC server.
  pub async fn playback_position_with_retry(&self, attempts: u32, delay: Duration) -> Option<f64> {
    for attempt in 0..attempts.max(1) {
      if self.socket_path.exists() {
        return self.try_playback_position().await;
      }
      debug!(attempt, "ipc: socket not present yet, retrying");
      tokio::time::sleep(delay).await;
    }
    None
  }
}

/// Runtime control over a running player, as the playback session needs it.
#[async_trait]
pub trait PlayerControl: Send + Sync {
  /// Best-effort current position; `None` when it can't be read.
  async fn position(&self) -> Option<f64>;
  async fn fullscreen(&self) -> bool;
  async fn set_fullscreen(&self, fullscreen: bool);
}

#[async_trait]
impl PlayerControl for IpcClient {
  async fn position(&self) -> Option<f64> {
    let c = constants();
    self.playback_position_with_retry(c.position_retry_attempts, c.position_retry_delay()).await
  }

  async fn fullscreen(&self) -> bool {
    IpcClient::fullscreen(self).await
  }

  async fn set_fullscreen(&self, fullscreen: bool) {
    IpcClient::set_fullscreen(self, fullscreen).await
  }
}
