use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::constants::constants;

/// User preferences persisted in `prefs.toml`. Every field is optional so a
/// partial or missing file falls back to the built-in constants.
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct Config {
  pub player_binary: Option<String>,
  pub ipc_socket: Option<PathBuf>,
  pub cookie_file: Option<PathBuf>,
  pub webdriver_url: Option<String>,
  pub low_latency: Option<bool>,
  pub separate_streams: Option<bool>,
  /// Native window id mpv embeds into when not detached.
  pub embed_window: Option<u64>,
  pub search_limit: Option<usize>,
  pub cache_max_entries: Option<usize>,
  pub cache_ttl_secs: Option<u64>,
  /// Write mpv's own log next to ours.
  pub player_log: Option<bool>,
}

fn project_dirs() -> Option<ProjectDirs> {
  ProjectDirs::from("", "", "ypv")
}

/// Directory for logs, cookies and other generated files.
pub fn data_dir() -> PathBuf {
  project_dirs().map(|d| d.data_local_dir().to_path_buf()).unwrap_or_else(std::env::temp_dir)
}

fn prefs_file() -> Option<PathBuf> {
  project_dirs().map(|d| d.config_dir().join("prefs.toml"))
}

impl Config {
  pub fn load() -> Self {
    prefs_file().map(|path| Self::load_from(&path)).unwrap_or_default()
  }

  pub fn load_from(path: &Path) -> Self {
    if let Ok(content) = std::fs::read_to_string(path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }
    Self::default()
  }

  pub fn save_to(&self, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let content = toml::to_string(self).context("Failed to serialize preferences")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
  }

  /// Store the playback toggles in `prefs.toml`. The in-memory config carries
  /// command-line overrides, so the file is re-read and only these two fields
  /// change.
  pub fn persist_playback_toggles(low_latency: bool, separate_streams: bool) {
    let Some(path) = prefs_file() else { return };
    if let Err(e) = Self::persist_playback_toggles_to(&path, low_latency, separate_streams) {
      warn!(err = %e, "config: failed to save preferences");
    }
  }

  pub fn persist_playback_toggles_to(path: &Path, low_latency: bool, separate_streams: bool) -> Result<()> {
    let mut stored = Self::load_from(path);
    stored.low_latency = Some(low_latency);
    stored.separate_streams = Some(separate_streams);
    stored.save_to(path)
  }

  pub fn player_binary(&self) -> String {
    self.player_binary.clone().unwrap_or_else(|| constants().player_binary.clone())
  }

  pub fn ipc_socket(&self) -> PathBuf {
    self.ipc_socket.clone().unwrap_or_else(|| PathBuf::from(&constants().ipc_socket_path))
  }

  pub fn cookie_file(&self) -> PathBuf {
    self.cookie_file.clone().unwrap_or_else(|| data_dir().join("cookies.txt"))
  }

  pub fn webdriver_url(&self) -> String {
    self.webdriver_url.clone().unwrap_or_else(|| constants().webdriver_url.clone())
  }

  pub fn search_limit(&self) -> usize {
    self.search_limit.filter(|n| *n > 0).unwrap_or(constants().search_limit)
  }

  pub fn cache_ttl(&self) -> Option<Duration> {
    self.cache_ttl_secs.map(Duration::from_secs)
  }

  pub fn player_log_file(&self) -> Option<PathBuf> {
    self.player_log.unwrap_or(false).then(|| data_dir().join("mpv.log"))
  }
}
