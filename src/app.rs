use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader as TokioBufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserAutomation, WebDriverBrowser};
use crate::cache::CachePolicy;
use crate::comments::{CommentPaginator, CommentUpdate};
use crate::config::Config;
use crate::constants::constants;
use crate::input::{self, PlayTarget};
use crate::ipc::IpcClient;
use crate::models::{CommentRecord, SearchEntry, VideoInfo};
use crate::pipeline::{Caches, Extraction, ExtractionPipeline};
use crate::player::PlayerProcessManager;
use crate::quality::QualityBucket;
use crate::session::{PlaybackIntent, PlaybackSession, PlaybackState, SessionEvent, SessionHandle, spawn_session};
use crate::worker::{TaskResult, WorkerPool, poll_task};
use crate::youtube::{YtDlp, http_client, low_res_thumbnail};

// --- Types ---

pub type Listing = Arc<Vec<SearchEntry>>;

/// In-flight worker tasks, polled every loop iteration.
#[derive(Default)]
pub(crate) struct AsyncTasks {
  pub(crate) listing_rx: Option<oneshot::Receiver<TaskResult<Listing>>>,
  pub(crate) extract_rx: Option<oneshot::Receiver<TaskResult<Extraction>>>,
  pub(crate) avatar_rx: Option<oneshot::Receiver<TaskResult<Option<String>>>>,
  pub(crate) thumb_rx: Option<oneshot::Receiver<TaskResult<PathBuf>>>,
}

pub struct App {
  config: Config,
  pool: WorkerPool,
  pipeline: Arc<ExtractionPipeline>,
  browser: Arc<dyn BrowserAutomation>,
  session: SessionHandle,
  session_events: mpsc::UnboundedReceiver<SessionEvent>,
  session_task: Option<JoinHandle<()>>,
  pub search_results: Vec<SearchEntry>,
  pub current: Option<Arc<VideoInfo>>,
  pub qualities: Vec<QualityBucket>,
  pub playback: Option<PlaybackState>,
  pub comments: CommentPaginator,
  pub comment_count: usize,
  pub should_quit: bool,
  pub(crate) tasks: AsyncTasks,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let c = constants();
    let http = http_client()?;
    let browser: Arc<dyn BrowserAutomation> = Arc::new(WebDriverBrowser::new(config.webdriver_url()));
    let caches = Arc::new(Caches::new(CachePolicy { max_entries: config.cache_max_entries, ttl: config.cache_ttl() }));
    let pipeline = Arc::new(ExtractionPipeline::new(
      Arc::new(YtDlp::default()),
      Arc::clone(&browser),
      http,
      config.cookie_file(),
      caches,
    ));

    let socket = config.ipc_socket();
    let backend = PlayerProcessManager::new(config.player_binary(), &socket).with_log_file(config.player_log_file());
    let initial = PlaybackState {
      low_latency: config.low_latency.unwrap_or(false),
      separate_streams: config.separate_streams.unwrap_or(false),
      ..PlaybackState::default()
    };
    let session = PlaybackSession::new(backend, IpcClient::new(&socket), config.embed_window, initial);
    let (session, session_events, session_task) = spawn_session(session, c.fullscreen_check_interval());
    info!(socket = %socket.display(), embed = ?config.embed_window, "app: session started");

    Ok(Self {
      pool: WorkerPool::new(c.worker_pool_size),
      pipeline,
      browser,
      session,
      session_events,
      session_task: Some(session_task),
      search_results: Vec::new(),
      current: None,
      qualities: Vec::new(),
      playback: None,
      comments: CommentPaginator::new(),
      comment_count: 0,
      should_quit: false,
      tasks: AsyncTasks::default(),
      config,
    })
  }

  pub fn say(&self, msg: &str) {
    println!("{}", msg);
  }

  pub fn set_error(&self, msg: String) {
    warn!(msg = %msg, "app: error shown");
    eprintln!("error: {}", msg);
  }

  fn save_config(&mut self, state: &PlaybackState) {
    let low_latency = Some(state.low_latency);
    let separate = Some(state.separate_streams);
    if self.config.low_latency != low_latency || self.config.separate_streams != separate {
      self.config.low_latency = low_latency;
      self.config.separate_streams = separate;
      Config::persist_playback_toggles(state.low_latency, state.separate_streams);
    }
  }

  // --- Triggers ---

  pub fn trigger_search(&mut self, query: &str) {
    let query = query.trim().to_string();
    if query.is_empty() {
      self.set_error("Enter a search term.".to_string());
      return;
    }
    self.say(&format!("Searching '{}'…", query));
    let pipeline = Arc::clone(&self.pipeline);
    let limit = self.config.search_limit();
    self.tasks.listing_rx = Some(self.pool.dispatch(async move { pipeline.search(&query, limit).await }));
  }

  pub fn trigger_channel(&mut self, channel_url: Option<String>) {
    let url = match channel_url {
      Some(url) => url,
      None => match self.current.as_ref().and_then(|v| v.uploader_url.clone()) {
        Some(url) => url,
        None => {
          self.set_error("No channel: play a video first or pass a channel URL.".to_string());
          return;
        }
      },
    };
    self.say(&format!("Listing {}…", url));
    let pipeline = Arc::clone(&self.pipeline);
    let limit = constants().channel_limit;
    self.tasks.listing_rx = Some(self.pool.dispatch(async move { pipeline.channel_videos(&url, limit).await }));
  }

  fn resolve_target(&self, target: PlayTarget) -> Option<String> {
    match target {
      PlayTarget::Url(url) => Some(url),
      PlayTarget::Index(n) => n.checked_sub(1).and_then(|i| self.search_results.get(i)).map(|e| e.url.clone()),
    }
  }

  pub fn trigger_play(&mut self, target: PlayTarget) {
    let Some(url) = self.resolve_target(target) else {
      self.set_error("No such result.".to_string());
      return;
    };
    self.say(&format!("Loading {}…", url));
    let pipeline = Arc::clone(&self.pipeline);
    self.tasks.extract_rx =
      Some(self.pool.dispatch(async move { pipeline.extract(&url).await.map_err(anyhow::Error::from) }));
  }

  pub fn trigger_comments(&mut self) {
    if self.current.is_none() {
      self.set_error("No video playing.".to_string());
      return;
    }
    if self.comments.is_exhausted() {
      self.say("No more comments.");
    } else if !self.comments.trigger(&self.pool, Arc::clone(&self.browser)) {
      self.say("Comments are already loading.");
    }
  }

  pub fn trigger_thumbnail(&mut self, index: usize) {
    let Some(entry) = index.checked_sub(1).and_then(|i| self.search_results.get(i)).cloned() else {
      self.set_error("No such result.".to_string());
      return;
    };
    let Some(thumb) = entry.thumbnail_url.as_deref().map(low_res_thumbnail) else {
      self.set_error(format!("No thumbnail for '{}'.", entry.title));
      return;
    };
    let path = std::env::temp_dir().join(format!("ypv-thumb-{}.jpg", entry.id));
    let pipeline = Arc::clone(&self.pipeline);
    self.tasks.thumb_rx = Some(self.pool.dispatch(async move {
      let bytes = pipeline.thumbnail(&thumb).await?;
      tokio::fs::write(&path, bytes.as_slice()).await.with_context(|| format!("Failed to write {}", path.display()))?;
      Ok::<_, anyhow::Error>(path)
    }));
  }

  fn trigger_avatar(&mut self, channel_url: String) {
    let pipeline = Arc::clone(&self.pipeline);
    self.tasks.avatar_rx = Some(self.pool.dispatch(async move { pipeline.channel_avatar(&channel_url).await }));
  }

  // --- Session intents ---

  fn send_intent(&mut self, intent: PlaybackIntent) {
    if !self.session.send(intent) {
      self.set_error("Playback session has stopped.".to_string());
    }
  }

  pub fn show_qualities(&self) {
    if self.qualities.is_empty() {
      self.say("No video loaded.");
      return;
    }
    let current = self.playback.as_ref().map(|s| s.quality);
    for q in &self.qualities {
      let marker = if Some(*q) == current { "*" } else { " " };
      self.say(&format!(" {} {}", marker, q));
    }
  }

  pub fn select_quality(&mut self, quality: QualityBucket) {
    self.send_intent(PlaybackIntent::SelectQuality(quality));
  }

  pub fn toggle_detach(&mut self) {
    self.send_intent(PlaybackIntent::ToggleDetach);
  }

  pub fn enter_fullscreen(&mut self) {
    self.send_intent(PlaybackIntent::EnterFullscreen);
  }

  pub fn exit_fullscreen(&mut self) {
    self.send_intent(PlaybackIntent::ExitFullscreen);
  }

  pub fn toggle_low_latency(&mut self) {
    self.send_intent(PlaybackIntent::ToggleLowLatency);
  }

  pub fn toggle_separate_streams(&mut self) {
    self.send_intent(PlaybackIntent::ToggleSeparateStreams);
  }

  pub fn stop(&mut self) {
    self.send_intent(PlaybackIntent::Stop);
  }

  // --- Completions ---

  fn print_listing(&self) {
    if self.search_results.is_empty() {
      self.say("No results found.");
      return;
    }
    for (i, entry) in self.search_results.iter().enumerate() {
      self.say(&format!("{:>3}. {}", i + 1, entry.title));
    }
  }

  fn print_comments(&self, comments: &[CommentRecord]) {
    for c in comments {
      self.say(&format!("  {}: {}", c.username, c.text));
    }
  }

  fn on_extracted(&mut self, extraction: Extraction) {
    let info = extraction.info;
    self.say(&format!("{} ({})", info.title, extraction.tier.label()));
    self.say(&format!("by {}", info.uploader));
    if let Some(line) = info.description.lines().find(|l| !l.trim().is_empty()) {
      self.say(&format!("  {}", line.trim()));
    }
    if let Some(channel) = info.uploader_url.clone() {
      self.trigger_avatar(channel);
    }
    self.comments.reset(info.url.clone());
    self.comment_count = 0;
    self.current = Some(Arc::clone(&info));
    self.send_intent(PlaybackIntent::Load(info));
    self.comments.trigger(&self.pool, Arc::clone(&self.browser));
  }

  pub fn check_pending(&mut self) {
    if let Some(result) = poll_task(&mut self.tasks.listing_rx) {
      match result {
        Ok(listing) => {
          self.search_results = listing.as_ref().clone();
          self.print_listing();
        }
        Err(e) => self.set_error(format!("Search failed: {}", e)),
      }
    }

    if let Some(result) = poll_task(&mut self.tasks.extract_rx) {
      match result {
        Ok(extraction) => self.on_extracted(extraction),
        Err(e) => self.set_error(format!("Failed to load: {}", e)),
      }
    }

    if let Some(result) = poll_task(&mut self.tasks.avatar_rx) {
      match result {
        Ok(Some(avatar)) => self.say(&format!("channel avatar: {}", avatar)),
        Ok(None) => debug!("app: channel page has no avatar"),
        Err(e) => warn!(err = %e, "app: avatar lookup failed"),
      }
    }

    if let Some(result) = poll_task(&mut self.tasks.thumb_rx) {
      match result {
        Ok(path) => self.say(&format!("thumbnail saved to {}", path.display())),
        Err(e) => self.set_error(format!("Thumbnail failed: {}", e)),
      }
    }

    if let Some(update) = self.comments.poll() {
      match update {
        CommentUpdate::Loaded(comments) => {
          self.comment_count += comments.len();
          self.say(&format!("{} new comments ({} total):", comments.len(), self.comment_count));
          self.print_comments(&comments);
        }
        CommentUpdate::Exhausted => self.say("No more comments."),
        CommentUpdate::Failed(e) => self.set_error(format!("Comments failed: {}", e)),
      }
    }
  }

  pub fn drain_session_events(&mut self) {
    while let Ok(event) = self.session_events.try_recv() {
      self.handle_session_event(event);
    }
  }

  fn handle_session_event(&mut self, event: SessionEvent) {
    match event {
      SessionEvent::QualitiesAvailable(qualities) => {
        let labels: Vec<&str> = qualities.iter().map(|q| q.label()).collect();
        self.say(&format!("qualities: {}", labels.join(", ")));
        self.qualities = qualities;
      }
      SessionEvent::Launched { state, separate } => {
        let window = match (state.fullscreen, state.detached) {
          (true, _) => "fullscreen",
          (false, true) => "detached",
          (false, false) => "embedded",
        };
        self.say(&format!(
          "playing {} {}{}{}",
          state.quality,
          window,
          if state.low_latency { ", low latency" } else { "" },
          if separate { ", separate streams" } else { "" },
        ));
        self.save_config(&state);
        self.playback = Some(state);
      }
      SessionEvent::ModeChanged(state) => {
        self.say(&format!("low latency: {}, separate streams: {}", state.low_latency, state.separate_streams));
        self.save_config(&state);
        self.playback = Some(state);
      }
      SessionEvent::Recovered { position } => {
        self.say(&format!("Player closed in fullscreen, resuming embedded at {:.1}s", position));
      }
      SessionEvent::Error(e) => self.set_error(e),
      SessionEvent::Stopped => {
        self.say("Stopped.");
        self.playback = None;
      }
    }
  }

  /// Stop the session actor and wait for the player to exit.
  pub async fn shutdown(&mut self) {
    self.session.shutdown();
    if let Some(task) = self.session_task.take()
      && let Err(e) = task.await
    {
      error!(err = %e, "app: session task failed");
    }
  }
}

/// Forward stdin lines into a channel so the control loop can poll them.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
  let (tx, rx) = mpsc::unbounded_channel();
  tokio::spawn(async move {
    let mut lines = TokioBufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
      if tx.send(line).is_err() {
        break;
      }
    }
  });
  rx
}

pub async fn run(mut app: App, initial_query: Option<String>) -> Result<()> {
  app.say("ypv: type `help` for commands.");
  if let Some(query) = initial_query {
    input::handle_line(&mut app, &query);
  }
  let mut lines = spawn_stdin_reader();

  loop {
    app.check_pending();
    app.drain_session_events();
    if app.should_quit {
      break;
    }

    match tokio::time::timeout(Duration::from_millis(100), lines.recv()).await {
      Ok(Some(line)) => input::handle_line(&mut app, &line),
      Ok(None) => {
        debug!("app: stdin closed");
        break;
      }
      Err(_) => {}
    }
  }

  app.shutdown().await;
  Ok(())
}
