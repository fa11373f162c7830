//! Playback session: the state machine that owns the player process.
//!
//! Every relaunch follows the same sequence: read the position, terminate and
//! await the old process(es), launch with that position as the start offset.
//! The session runs as an actor so intents and reconciliation ticks are
//! applied strictly one at a time.

use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ipc::PlayerControl;
use crate::models::{FormatRecord, VideoInfo};
use crate::player::{LaunchOptions, LaunchPlan, PlayerBackend, StreamSource};
use crate::quality::{DEFAULT_FLOOR, QualityBucket, available_buckets};

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
  pub quality: QualityBucket,
  pub detached: bool,
  pub fullscreen: bool,
  pub low_latency: bool,
  pub separate_streams: bool,
  pub last_position: f64,
}

impl Default for PlaybackState {
  fn default() -> Self {
    Self {
      quality: DEFAULT_FLOOR,
      detached: false,
      fullscreen: false,
      low_latency: false,
      separate_streams: false,
      last_position: 0.0,
    }
  }
}

#[derive(Debug, Clone)]
pub enum PlaybackIntent {
  Load(Arc<VideoInfo>),
  SelectQuality(QualityBucket),
  ToggleDetach,
  EnterFullscreen,
  ExitFullscreen,
  ToggleLowLatency,
  ToggleSeparateStreams,
  Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
  QualitiesAvailable(Vec<QualityBucket>),
  Launched { state: PlaybackState, separate: bool },
  /// The player died while fullscreen and was relaunched embedded.
  Recovered { position: f64 },
  /// A mode flag changed without a relaunch (nothing was playing).
  ModeChanged(PlaybackState),
  Error(String),
  Stopped,
}

/// Pick `(video_url, audio_url)` for separate-stream playback: the tallest
/// video-only rendition the bucket accepts (falling back to the tallest
/// overall) and the highest-bitrate audio-only rendition.
pub fn select_separate_streams(info: &VideoInfo, quality: QualityBucket) -> Option<(String, String)> {
  let by_size = |a: &&FormatRecord, b: &&FormatRecord| a.height.cmp(&b.height).then(a.fps.total_cmp(&b.fps));
  let video_only: Vec<&FormatRecord> = info.formats.iter().filter(|f| f.is_video_only()).collect();
  let video = video_only
    .iter()
    .copied()
    .filter(|f| quality.accepts(f.height, f.fps))
    .max_by(by_size)
    .or_else(|| video_only.iter().copied().max_by(by_size))?;
  let audio = info
    .formats
    .iter()
    .filter(|f| f.is_audio_only())
    .max_by(|a, b| a.bitrate.unwrap_or(0.0).total_cmp(&b.bitrate.unwrap_or(0.0)))?;
  debug!(video = %video.format_id, audio = %audio.format_id, "session: separate streams selected");
  Some((video.url.clone(), audio.url.clone()))
}

pub struct PlaybackSession<B, C> {
  backend: B,
  control: C,
  state: PlaybackState,
  video: Option<Arc<VideoInfo>>,
  available: Vec<QualityBucket>,
  embed_target: Option<u64>,
  /// Bumped on every launch and stop; reconciliation ticks carry the value they were armed for.
  generation: u64,
  /// A launch succeeded and has not been stopped since.
  active: bool,
}

impl<B: PlayerBackend, C: PlayerControl> PlaybackSession<B, C> {
  pub fn new(backend: B, control: C, embed_target: Option<u64>, initial: PlaybackState) -> Self {
    Self {
      backend,
      control,
      state: initial,
      video: None,
      available: Vec::new(),
      embed_target,
      generation: 0,
      active: false,
    }
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// Generation the fullscreen monitor should run for, if it should run at all.
  pub fn reconcile_generation(&self) -> Option<u64> {
    (self.active && self.state.fullscreen).then_some(self.generation)
  }

  fn is_running(&mut self) -> bool {
    self.active && self.backend.is_running()
  }

  /// Refresh `last_position` from the player if it is running and answers.
  async fn capture_position(&mut self) -> f64 {
    if self.is_running()
      && let Some(position) = self.control.position().await
    {
      self.state.last_position = position;
    }
    self.state.last_position
  }

  fn plan(&self) -> Result<LaunchPlan> {
    let video = self.video.as_ref().ok_or_else(|| anyhow!("No video loaded"))?;
    let options = LaunchOptions {
      embed_target: if self.state.detached { None } else { self.embed_target },
      start_position: self.state.last_position,
      force_fullscreen: self.state.fullscreen,
      low_latency: self.state.low_latency,
    };
    let separate = if self.state.separate_streams {
      let streams = select_separate_streams(video, self.state.quality);
      if streams.is_none() {
        info!("session: no separate audio/video formats, using merged playback");
      }
      streams
    } else {
      None
    };
    let source = match separate {
      Some((video_url, audio_url)) => StreamSource::Separate { video_url, audio_url },
      None => {
        StreamSource::Merged { url: video.url.clone(), format: self.state.quality.format_expression().to_string() }
      }
    };
    Ok(LaunchPlan { source, options })
  }

  async fn launch(&mut self) -> Result<SessionEvent> {
    let plan = self.plan()?;
    self.generation += 1;
    if let Err(e) = self.backend.launch(&plan).await {
      self.active = false;
      return Err(e);
    }
    self.active = true;
    let separate = matches!(plan.source, StreamSource::Separate { .. });
    info!(
      generation = self.generation,
      quality = %self.state.quality,
      start = self.state.last_position,
      "session: launched"
    );
    Ok(SessionEvent::Launched { state: self.state.clone(), separate })
  }

  async fn relaunch_from_current_position(&mut self) -> Result<SessionEvent> {
    self.capture_position().await;
    self.launch().await
  }

  pub async fn apply(&mut self, intent: PlaybackIntent) -> Result<Vec<SessionEvent>> {
    debug!(?intent, "session: applying intent");
    match intent {
      PlaybackIntent::Load(video) => {
        self.available = available_buckets(&video);
        self.state.quality = self.available.first().copied().unwrap_or(DEFAULT_FLOOR);
        self.state.last_position = 0.0;
        self.video = Some(video);
        let available = SessionEvent::QualitiesAvailable(self.available.clone());
        Ok(vec![available, self.launch().await?])
      }
      PlaybackIntent::SelectQuality(quality) => {
        self.require_video()?;
        if !self.available.contains(&quality) {
          return Err(anyhow!("Quality {} is not available for this video", quality));
        }
        self.capture_position().await;
        self.state.quality = quality;
        Ok(vec![self.launch().await?])
      }
      PlaybackIntent::ToggleDetach => {
        self.require_video()?;
        self.capture_position().await;
        self.state.detached = !self.state.detached;
        if !self.state.detached {
          self.state.fullscreen = false;
        }
        Ok(vec![self.launch().await?])
      }
      PlaybackIntent::EnterFullscreen => {
        self.require_video()?;
        if self.state.fullscreen && self.is_running() {
          return Ok(Vec::new());
        }
        self.capture_position().await;
        self.state.detached = true;
        self.state.fullscreen = true;
        Ok(vec![self.launch().await?])
      }
      PlaybackIntent::ExitFullscreen => {
        if !self.state.fullscreen {
          return Ok(Vec::new());
        }
        self.capture_position().await;
        self.state.fullscreen = false;
        Ok(vec![self.launch().await?])
      }
      PlaybackIntent::ToggleLowLatency => {
        self.state.low_latency = !self.state.low_latency;
        self.relaunch_if_running().await
      }
      PlaybackIntent::ToggleSeparateStreams => {
        self.state.separate_streams = !self.state.separate_streams;
        self.relaunch_if_running().await
      }
      PlaybackIntent::Stop => {
        self.stop().await;
        Ok(vec![SessionEvent::Stopped])
      }
    }
  }

  fn require_video(&self) -> Result<()> {
    if self.video.is_none() {
      return Err(anyhow!("No video loaded"));
    }
    Ok(())
  }

  async fn relaunch_if_running(&mut self) -> Result<Vec<SessionEvent>> {
    if self.is_running() {
      Ok(vec![self.relaunch_from_current_position().await?])
    } else {
      Ok(vec![SessionEvent::ModeChanged(self.state.clone())])
    }
  }

  /// One pass of the fullscreen monitor.
  pub async fn reconcile_tick(&mut self) -> Result<Vec<SessionEvent>> {
    if !self.active || !self.state.fullscreen {
      return Ok(Vec::new());
    }
    if !self.backend.is_running() {
      let position = self.state.last_position;
      warn!(position, "session: player exited during fullscreen, re-embedding");
      self.state.fullscreen = false;
      self.state.detached = false;
      let launched = self.launch().await?;
      return Ok(vec![SessionEvent::Recovered { position }, launched]);
    }
    if !self.control.fullscreen().await {
      info!("session: fullscreen drifted, re-asserting");
      self.control.set_fullscreen(true).await;
    }
    if let Some(position) = self.control.position().await {
      self.state.last_position = position;
    }
    Ok(Vec::new())
  }

  pub async fn stop(&mut self) {
    self.capture_position().await;
    self.backend.shutdown().await;
    self.generation += 1;
    self.active = false;
    info!("session: stopped");
  }
}

// --- Actor ---

#[derive(Debug)]
pub enum SessionCommand {
  Intent(PlaybackIntent),
  /// Fullscreen monitor tick for the given generation.
  Tick(u64),
  Shutdown,
}

#[derive(Clone)]
pub struct SessionHandle {
  tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
  /// Queue an intent. Returns `false` if the session actor has gone away.
  pub fn send(&self, intent: PlaybackIntent) -> bool {
    self.command(SessionCommand::Intent(intent))
  }

  pub fn shutdown(&self) {
    let _ = self.tx.send(SessionCommand::Shutdown);
  }

  pub(crate) fn command(&self, command: SessionCommand) -> bool {
    self.tx.send(command).is_ok()
  }
}

/// Run `session` on its own task. Events come back on the returned receiver;
/// the task ends after `Shutdown` or once every handle is dropped, stopping
/// the player on the way out.
pub fn spawn_session<B, C>(
  session: PlaybackSession<B, C>,
  check_interval: Duration,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>, JoinHandle<()>)
where
  B: PlayerBackend + 'static,
  C: PlayerControl + 'static,
{
  let (tx, rx) = mpsc::unbounded_channel();
  let (event_tx, event_rx) = mpsc::unbounded_channel();
  let ticks = tx.downgrade();
  let task = tokio::spawn(run_session(session, rx, ticks, event_tx, check_interval));
  (SessionHandle { tx }, event_rx, task)
}

fn spawn_ticker(
  commands: mpsc::WeakUnboundedSender<SessionCommand>,
  generation: u64,
  interval: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    loop {
      tokio::time::sleep(interval).await;
      let Some(tx) = commands.upgrade() else { break };
      if tx.send(SessionCommand::Tick(generation)).is_err() {
        break;
      }
    }
  })
}

async fn run_session<B: PlayerBackend, C: PlayerControl>(
  mut session: PlaybackSession<B, C>,
  mut rx: mpsc::UnboundedReceiver<SessionCommand>,
  ticks: mpsc::WeakUnboundedSender<SessionCommand>,
  events: mpsc::UnboundedSender<SessionEvent>,
  check_interval: Duration,
) {
  let mut ticker: Option<(u64, JoinHandle<()>)> = None;

  while let Some(command) = rx.recv().await {
    let result = match command {
      SessionCommand::Intent(intent) => session.apply(intent).await,
      SessionCommand::Tick(generation) if generation == session.generation() => session.reconcile_tick().await,
      SessionCommand::Tick(generation) => {
        debug!(generation, current = session.generation(), "session: ignoring stale tick");
        Ok(Vec::new())
      }
      SessionCommand::Shutdown => break,
    };
    match result {
      Ok(emitted) => {
        for event in emitted {
          let _ = events.send(event);
        }
      }
      Err(e) => {
        warn!(err = %format!("{:#}", e), "session: intent failed");
        let _ = events.send(SessionEvent::Error(format!("{:#}", e)));
      }
    }

    let armed = ticker.as_ref().map(|(generation, _)| *generation);
    match (session.reconcile_generation(), armed) {
      (Some(wanted), Some(armed)) if wanted == armed => {}
      (Some(wanted), _) => {
        if let Some((_, handle)) = ticker.take() {
          handle.abort();
        }
        debug!(generation = wanted, "session: arming fullscreen monitor");
        ticker = Some((wanted, spawn_ticker(ticks.clone(), wanted, check_interval)));
      }
      (None, Some(_)) => {
        if let Some((_, handle)) = ticker.take() {
          handle.abort();
        }
      }
      (None, None) => {}
    }
  }

  if let Some((_, handle)) = ticker.take() {
    handle.abort();
  }
  session.stop().await;
  let _ = events.send(SessionEvent::Stopped);
}
