mod app;
mod browser;
mod cache;
mod comments;
mod config;
mod constants;
mod cookies;
mod input;
mod ipc;
mod models;
mod pipeline;
mod player;
mod quality;
mod session;
mod worker;
mod youtube;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use app::App;
use config::Config;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
  #[command(subcommand)]
  command: Option<Commands>,

  /// Search text, channel handle or video URL to start with
  #[arg(trailing_var_arg = true)]
  query: Vec<String>,

  /// mpv IPC socket path (default: /tmp/mpvsocket)
  #[arg(long)]
  socket: Option<PathBuf>,

  /// Native window id to embed the player into; without it the player opens its own window
  #[arg(long)]
  wid: Option<u64>,

  /// Player executable
  #[arg(long)]
  player: Option<String>,

  /// WebDriver endpoint used for cookie harvesting and comments
  #[arg(long)]
  webdriver: Option<String>,

  /// Netscape cookie file to use (and create when missing)
  #[arg(long)]
  cookies: Option<PathBuf>,

  /// Start with the low-latency cache preset
  #[arg(long)]
  low_latency: bool,

  /// Start with separate audio/video streams
  #[arg(long)]
  separate: bool,

  /// Write mpv's log to the data directory
  #[arg(long)]
  player_log: bool,

  /// Log to stderr instead of the rolling log file
  #[arg(long)]
  log_stderr: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Print shell completions
  Completions {
    #[arg(value_enum)]
    shell: Shell,
  },
}

impl Args {
  /// Flags given on the command line win over `prefs.toml`.
  fn apply_to(&self, config: &mut Config) {
    if let Some(ref socket) = self.socket {
      config.ipc_socket = Some(socket.clone());
    }
    if self.wid.is_some() {
      config.embed_window = self.wid;
    }
    if let Some(ref player) = self.player {
      config.player_binary = Some(player.clone());
    }
    if let Some(ref url) = self.webdriver {
      config.webdriver_url = Some(url.clone());
    }
    if let Some(ref cookies) = self.cookies {
      config.cookie_file = Some(cookies.clone());
    }
    if self.low_latency {
      config.low_latency = Some(true);
    }
    if self.separate {
      config.separate_streams = Some(true);
    }
    if self.player_log {
      config.player_log = Some(true);
    }
  }
}

// --- Logging ---

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Stdout belongs to the console, so logs go to a daily file unless `to_stderr`.
fn init_logging(to_stderr: bool) -> Result<Option<WorkerGuard>> {
  if to_stderr {
    tracing_subscriber::fmt().with_env_filter(env_filter()).with_writer(std::io::stderr).init();
    return Ok(None);
  }
  let log_dir = config::data_dir().join("logs");
  std::fs::create_dir_all(&log_dir).with_context(|| format!("Failed to create {}", log_dir.display()))?;
  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "ypv.log"));
  tracing_subscriber::fmt().with_env_filter(env_filter()).with_writer(writer).with_ansi(false).init();
  Ok(Some(guard))
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  if let Some(Commands::Completions { shell }) = args.command {
    clap_complete::generate(shell, &mut Args::command(), "ypv", &mut std::io::stdout());
    return Ok(());
  }

  let _log_guard = init_logging(args.log_stderr)?;
  info!(version = env!("CARGO_PKG_VERSION"), "ypv starting");

  let mut config = Config::load();
  args.apply_to(&mut config);

  let query = (!args.query.is_empty()).then(|| args.query.join(" "));
  let app = App::new(config)?;
  app::run(app, query).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cli_is_well_formed() {
    Args::command().debug_assert();
  }

  #[test]
  fn flags_override_config() {
    let args =
      Args::parse_from(["ypv", "--socket", "/tmp/other.sock", "--wid", "77", "--low-latency", "lofi", "beats"]);
    let mut config = Config { low_latency: Some(false), search_limit: Some(5), ..Config::default() };
    args.apply_to(&mut config);
    assert_eq!(config.ipc_socket(), PathBuf::from("/tmp/other.sock"));
    assert_eq!(config.embed_window, Some(77));
    assert_eq!(config.low_latency, Some(true));
    assert_eq!(config.search_limit(), 5);
    assert_eq!(args.query.join(" "), "lofi beats");
  }

  #[test]
  fn one_off_flags_stay_out_of_prefs() {
    let dir = tempfile::tempdir().unwrap();
    let prefs = dir.path().join("prefs.toml");
    std::fs::write(&prefs, "search_limit = 7\n").unwrap();

    let args =
      Args::parse_from(["ypv", "--wid", "77", "--socket", "/tmp/one-off.sock", "--player-log", "--low-latency"]);
    let mut config = Config::load_from(&prefs);
    args.apply_to(&mut config);
    assert_eq!(config.embed_window, Some(77));

    Config::persist_playback_toggles_to(&prefs, true, false).unwrap();
    let saved = std::fs::read_to_string(&prefs).unwrap();
    assert!(saved.contains("low_latency = true"));
    assert!(saved.contains("search_limit = 7"));
    for field in ["embed_window", "ipc_socket", "player_log", "player_binary", "cookie_file"] {
      assert!(!saved.contains(field), "{} leaked into prefs: {}", field, saved);
    }
  }

  #[test]
  fn completions_subcommand_parses() {
    let args = Args::parse_from(["ypv", "completions", "zsh"]);
    assert!(matches!(args.command, Some(Commands::Completions { shell: Shell::Zsh })));
  }
}
