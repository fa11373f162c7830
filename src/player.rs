//! mpv process lifecycle: argument construction, spawn, graceful termination.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child as TokioChild, Command};
use tracing::{debug, info, warn};

use crate::constants::constants;

/// Per-launch options derived from the session state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LaunchOptions {
  /// Native window id to embed into; `None` opens a top-level window.
  pub embed_target: Option<u64>,
  pub start_position: f64,
  pub force_fullscreen: bool,
  pub low_latency: bool,
}

/// What mpv should play.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSource {
  /// One process, mpv resolves the page URL itself with a format expression.
  Merged { url: String, format: String },
  /// Two processes started back-to-back on direct stream URLs.
  Separate { video_url: String, audio_url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
  pub source: StreamSource,
  pub options: LaunchOptions,
}

/// Build mpv's argument list for one process.
///
/// Order: fullscreen, cache preset, window embedding, start offset, fixed
/// player flags, format, log file, IPC socket, extra flags, URL, trailing flags.
pub fn build_args(
  url: &str,
  format: Option<&str>,
  socket: &Path,
  options: &LaunchOptions,
  log_file: Option<&Path>,
  extra: &[&str],
) -> Vec<String> {
  let c = constants();
  let mut args = Vec::new();
  if options.force_fullscreen {
    args.push("--fullscreen".to_string());
  }
  let preset = if options.low_latency { &c.low_latency_preset } else { &c.buffered_preset };
  args.extend(preset.iter().cloned());
  if let Some(wid) = options.embed_target {
    args.push(format!("--wid={}", wid));
  }
  if options.start_position > 0.0 {
    args.push(format!("--start={}", options.start_position));
  }
  args.extend(c.player_flags.iter().cloned());
  if let Some(format) = format {
    args.push(format!("--ytdl-format={}", format));
  }
  if let Some(log_file) = log_file {
    args.push(format!("--log-file={}", log_file.display()));
  }
  args.push(format!("--input-ipc-server={}", socket.display()));
  args.extend(extra.iter().map(|s| s.to_string()));
  args.push(url.to_string());
  args.extend(c.player_trailing_flags.iter().cloned());
  args
}

/// Process-level operations the playback session drives.
#[async_trait]
pub trait PlayerBackend: Send {
  /// Terminate whatever is running, then start `plan`.
  async fn launch(&mut self, plan: &LaunchPlan) -> Result<()>;
  /// Whether the primary player process is still alive.
  fn is_running(&mut self) -> bool;
  async fn shutdown(&mut self);
}

pub struct PlayerProcessManager {
  binary: String,
  socket_path: PathBuf,
  log_file: Option<PathBuf>,
  terminate_timeout: Duration,
  player: Option<TokioChild>,
  /// Audio-only companion in separate-stream mode.
  companion: Option<TokioChild>,
}

impl PlayerProcessManager {
  pub fn new(binary: impl Into<String>, socket_path: impl Into<PathBuf>) -> Self {
    Self {
      binary: binary.into(),
      socket_path: socket_path.into(),
      log_file: None,
      terminate_timeout: constants().terminate_timeout(),
      player: None,
      companion: None,
    }
  }

  pub fn with_log_file(mut self, log_file: Option<PathBuf>) -> Self {
    self.log_file = log_file;
    self
  }

  pub fn audio_socket_path(&self) -> PathBuf {
    let mut s = self.socket_path.clone().into_os_string();
    s.push(&constants().audio_socket_suffix);
    PathBuf::from(s)
  }

  fn spawn(&self, args: &[String], socket: &Path) -> Result<TokioChild> {
    // Remove stale socket if it exists from a previous crash.
    let _ = std::fs::remove_file(socket);
    debug!(binary = %self.binary, args = ?args, "player: spawning");
    let mut cmd = Command::new(&self.binary);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    // Never pipe without draining: a full pipe buffer blocks mpv.
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    cmd.kill_on_drop(true);
    cmd.spawn().map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        anyhow!("{} not found. Install it with: brew install mpv (macOS) or apt install mpv (Linux)", self.binary)
      } else {
        anyhow!(e).context("Failed to spawn player process")
      }
    })
  }

  /// Stop the tracked player and companion, waiting for both to exit.
  pub async fn terminate_all(&mut self) {
    if let Some(child) = self.player.take() {
      terminate(child, self.terminate_timeout, "player").await;
    }
    if let Some(child) = self.companion.take() {
      terminate(child, self.terminate_timeout, "audio companion").await;
    }
  }
}

/// SIGTERM, bounded wait, then SIGKILL. Always reaps the child.
async fn terminate(mut child: TokioChild, timeout: Duration, role: &str) {
  if let Ok(Some(status)) = child.try_wait() {
    debug!(role, ?status, "player: process already exited");
    return;
  }
  if let Some(pid) = child.id() {
    // Safety: `pid` belongs to a child we spawned and have not reaped yet, so it
    // cannot have been recycled for an unrelated process.
    unsafe {
      libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
  }
  match tokio::time::timeout(timeout, child.wait()).await {
    Ok(Ok(status)) => debug!(role, ?status, "player: exited after SIGTERM"),
    Ok(Err(e)) => warn!(role, err = %e, "player: wait failed"),
    Err(_) => {
      warn!(role, "player: did not exit in time, killing");
      if let Err(e) = child.kill().await {
        warn!(role, err = %e, "player: kill failed");
      }
    }
  }
}

/// `None` when nothing is tracked in `slot`.
fn child_alive(slot: &mut Option<TokioChild>, role: &str) -> Option<bool> {
  let child = slot.as_mut()?;
  Some(match child.try_wait() {
    Ok(None) => true,
    Ok(Some(status)) => {
      debug!(role, ?status, "player: process has exited");
      false
    }
    Err(e) => {
      warn!(role, err = %e, "player: liveness check failed");
      false
    }
  })
}

#[async_trait]
impl PlayerBackend for PlayerProcessManager {
  async fn launch(&mut self, plan: &LaunchPlan) -> Result<()> {
    self.terminate_all().await;
    let log_file = self.log_file.clone();
    match &plan.source {
      StreamSource::Merged { url, format } => {
        let args = build_args(url, Some(format), &self.socket_path, &plan.options, log_file.as_deref(), &[]);
        self.player = Some(self.spawn(&args, &self.socket_path).context("Failed to launch player")?);
      }
      StreamSource::Separate { video_url, audio_url } => {
        let video_args =
          build_args(video_url, None, &self.socket_path, &plan.options, log_file.as_deref(), &["--no-audio"]);
        let audio_socket = self.audio_socket_path();
        let audio_options = LaunchOptions { embed_target: None, force_fullscreen: false, ..plan.options.clone() };
        let audio_args = build_args(audio_url, None, &audio_socket, &audio_options, None, &["--no-video"]);
        self.player = Some(self.spawn(&video_args, &self.socket_path).context("Failed to launch video player")?);
        match self.spawn(&audio_args, &audio_socket) {
          Ok(child) => self.companion = Some(child),
          Err(e) => {
            self.terminate_all().await;
            return Err(e.context("Failed to launch audio player"));
          }
        }
      }
    }
    info!(
      start = plan.options.start_position,
      fullscreen = plan.options.force_fullscreen,
      embedded = plan.options.embed_target.is_some(),
      low_latency = plan.options.low_latency,
      "player: launched"
    );
    Ok(())
  }

  /// In separate-stream mode playback counts as running only while both the
  /// video player and its audio companion are alive.
  fn is_running(&mut self) -> bool {
    let Some(player_alive) = child_alive(&mut self.player, "player") else { return false };
    if child_alive(&mut self.companion, "audio companion") == Some(false) {
      warn!("player: audio companion exited, video is playing without sound");
      return false;
    }
    player_alive
  }

  async fn shutdown(&mut self) {
    self.terminate_all().await;
    let _ = std::fs::remove_file(&self.socket_path);
    let _ = std::fs::remove_file(self.audio_socket_path());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn socket() -> PathBuf {
    PathBuf::from("/tmp/mpvsocket")
  }

  #[test]
  fn buffered_embedded_args() {
    let options = LaunchOptions { embed_target: Some(4242), ..LaunchOptions::default() };
    let args = build_args("https://youtu.be/x", Some("best"), &socket(), &options, None, &[]);
    assert_eq!(args[..3], ["--cache=yes", "--cache-secs=30", "--demuxer-readahead-secs=10"]);
    assert!(args.contains(&"--wid=4242".to_string()));
    assert!(args.contains(&"--ytdl-format=best".to_string()));
    assert!(args.contains(&"--input-ipc-server=/tmp/mpvsocket".to_string()));
    assert!(!args.iter().any(|a| a.starts_with("--start")));
    assert!(!args.contains(&"--fullscreen".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("--panscan=1.0"));
    assert_eq!(args[args.len() - 2], "https://youtu.be/x");
  }

  #[test]
  fn low_latency_detached_fullscreen_args() {
    let options =
      LaunchOptions { embed_target: None, start_position: 42.5, force_fullscreen: true, low_latency: true };
    let args = build_args("u", Some("best"), &socket(), &options, None, &[]);
    assert_eq!(args[0], "--fullscreen");
    assert_eq!(args[1], "--cache=no");
    assert!(args.contains(&"--demuxer-max-bytes=524288".to_string()));
    assert!(!args.contains(&"--cache=yes".to_string()));
    assert!(!args.iter().any(|a| a.starts_with("--wid")));
    assert!(args.contains(&"--start=42.5".to_string()));
  }

  #[test]
  fn start_precedes_format_and_socket() {
    let options = LaunchOptions { start_position: 3.0, ..LaunchOptions::default() };
    let args = build_args("u", Some("f"), &socket(), &options, Some(Path::new("/tmp/mpv.log")), &["--no-audio"]);
    let pos = |needle: &str| args.iter().position(|a| a.starts_with(needle)).unwrap();
    assert!(pos("--start=") < pos("--ytdl-format="));
    assert!(pos("--ytdl-format=") < pos("--log-file="));
    assert!(pos("--log-file=") < pos("--input-ipc-server="));
    assert!(pos("--input-ipc-server=") < pos("--no-audio"));
  }

  #[test]
  fn audio_socket_has_suffix() {
    let manager = PlayerProcessManager::new("mpv", "/tmp/mpvsocket");
    assert_eq!(manager.audio_socket_path(), PathBuf::from("/tmp/mpvsocket.audio"));
  }

  #[tokio::test]
  async fn missing_binary_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = PlayerProcessManager::new("definitely-not-a-player-binary", dir.path().join("s.sock"));
    let plan = LaunchPlan {
      source: StreamSource::Merged { url: "u".into(), format: "best".into() },
      options: LaunchOptions::default(),
    };
    let err = manager.launch(&plan).await.unwrap_err();
    assert!(format!("{:#}", err).contains("not found"));
    assert!(!manager.is_running());
  }

  #[tokio::test]
  async fn relaunch_terminates_previous_process() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = PlayerProcessManager::new("mpv", dir.path().join("s.sock"));
    manager.player = Some(Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap());
    assert!(manager.is_running());
    manager.terminate_all().await;
    assert!(manager.player.is_none());
    assert!(!manager.is_running());
  }

  #[tokio::test]
  async fn dead_audio_companion_stops_playback() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = PlayerProcessManager::new("mpv", dir.path().join("s.sock"));
    manager.player = Some(Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap());
    manager.companion = Some(Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap());
    assert!(manager.is_running());

    let mut companion = manager.companion.take().unwrap();
    companion.kill().await.unwrap();
    manager.companion = Some(companion);
    assert!(!manager.is_running());
    manager.terminate_all().await;
  }
}
