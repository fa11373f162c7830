//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!`, so there is no runtime file
//! I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Player process
  pub player_binary: String,
  pub ipc_socket_path: String,
  pub audio_socket_suffix: String,
  pub player_flags: Vec<String>,
  pub player_trailing_flags: Vec<String>,
  pub buffered_preset: Vec<String>,
  pub low_latency_preset: Vec<String>,
  pub terminate_timeout_ms: u64,

  // IPC
  pub ipc_timeout_ms: u64,
  pub ipc_max_lines: usize,
  pub position_retry_attempts: u32,
  pub position_retry_delay_ms: u64,

  // Session
  pub fullscreen_check_interval_ms: u64,

  // Workers
  pub worker_pool_size: usize,

  // yt-dlp
  pub search_limit: usize,
  pub channel_limit: usize,
  pub socket_timeout_secs: u64,
  pub extract_timeout_secs: u64,

  // HTTP
  pub http_timeout_secs: u64,
  pub user_agent: String,

  // Browser automation
  pub webdriver_url: String,
  pub page_load_timeout_secs: u64,
  pub cookie_settle_ms: u64,
  pub comment_mount_timeout_secs: u64,
  pub scrolls_per_depth: u32,
  pub scroll_pixels: u32,
  pub scroll_settle_ms: u64,
}

impl Constants {
  pub fn ipc_timeout(&self) -> Duration {
    Duration::from_millis(self.ipc_timeout_ms)
  }

  pub fn terminate_timeout(&self) -> Duration {
    Duration::from_millis(self.terminate_timeout_ms)
  }

  pub fn position_retry_delay(&self) -> Duration {
    Duration::from_millis(self.position_retry_delay_ms)
  }

  pub fn fullscreen_check_interval(&self) -> Duration {
    Duration::from_millis(self.fullscreen_check_interval_ms)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed this is a build-time error.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}
