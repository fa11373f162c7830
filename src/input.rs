use anyhow::{Result, anyhow};

use crate::app::App;
use crate::quality::QualityBucket;
use crate::youtube::{detect_channel_url, is_video_url};

pub const HELP: &str = "\
commands:
  search <text>      search (bare text works too; @handle or a channel URL lists the channel)
  play <n|url>       play result n or a video URL
  qualities          list qualities for the current video
  quality <label>    switch quality, e.g. `quality 720p`
  detach             toggle embedded/detached window
  fullscreen         detach and go fullscreen
  windowed           leave fullscreen
  lowlatency         toggle the low-latency cache preset
  separate           toggle separate audio/video streams
  comments           load more comments
  channel [url]      list the uploader's (or the given channel's) videos
  thumb <n>          save the thumbnail of result n to a temp file
  stop               stop playback
  help               show this
  quit               exit";

#[derive(Debug, Clone, PartialEq)]
pub enum PlayTarget {
  /// 1-based index into the last listing.
  Index(usize),
  Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
  Search(String),
  Play(PlayTarget),
  Qualities,
  Quality(QualityBucket),
  Detach,
  Fullscreen,
  Windowed,
  LowLatency,
  Separate,
  Comments,
  /// `None` lists the current video's uploader.
  Channel(Option<String>),
  Thumb(usize),
  Stop,
  Help,
  Quit,
}

fn parse_index(arg: &str) -> Result<usize> {
  match arg.parse::<usize>() {
    Ok(n) if n > 0 => Ok(n),
    _ => Err(anyhow!("Expected a result number, got '{}'", arg)),
  }
}

/// Parse one console line. Empty lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
  let line = line.trim();
  if line.is_empty() {
    return Ok(None);
  }
  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };

  let command = match (word.to_lowercase().as_str(), rest) {
    ("search" | "s", "") => return Err(anyhow!("Enter a search term.")),
    ("search" | "s", query) => match detect_channel_url(query) {
      Some(channel) => Command::Channel(Some(channel)),
      None => Command::Search(query.to_string()),
    },
    ("play" | "p", "") => return Err(anyhow!("Usage: play <n|url>")),
    ("play" | "p", arg) if is_video_url(arg) => Command::Play(PlayTarget::Url(arg.to_string())),
    ("play" | "p", arg) => Command::Play(PlayTarget::Index(parse_index(arg)?)),
    ("qualities" | "q", "") => Command::Qualities,
    ("quality", "") => return Err(anyhow!("Usage: quality <label>")),
    ("quality", label) => Command::Quality(label.parse()?),
    ("detach", "") => Command::Detach,
    ("fullscreen" | "fs", "") => Command::Fullscreen,
    ("windowed", "") => Command::Windowed,
    ("lowlatency" | "ll", "") => Command::LowLatency,
    ("separate", "") => Command::Separate,
    ("comments" | "c", "") => Command::Comments,
    ("channel", "") => Command::Channel(None),
    ("channel", arg) => {
      let url = detect_channel_url(arg).or_else(|| detect_channel_url(&format!("/channel {}", arg)));
      Command::Channel(url)
    }
    ("thumb", arg) => Command::Thumb(parse_index(arg)?),
    ("stop", "") => Command::Stop,
    ("help" | "?", "") => Command::Help,
    ("quit" | "exit", "") => Command::Quit,
    _ if is_video_url(line) => Command::Play(PlayTarget::Url(line.to_string())),
    _ => match detect_channel_url(line) {
      Some(channel) => Command::Channel(Some(channel)),
      None => Command::Search(line.to_string()),
    },
  };
  Ok(Some(command))
}

// --- Dispatch ---

pub fn handle_line(app: &mut App, line: &str) {
  match parse_command(line) {
    Ok(Some(command)) => handle_command(app, command),
    Ok(None) => {}
    Err(e) => app.set_error(format!("{:#}", e)),
  }
}

pub fn handle_command(app: &mut App, command: Command) {
  match command {
    Command::Search(query) => app.trigger_search(&query),
    Command::Play(target) => app.trigger_play(target),
    Command::Qualities => app.show_qualities(),
    Command::Quality(quality) => app.select_quality(quality),
    Command::Detach => app.toggle_detach(),
    Command::Fullscreen => app.enter_fullscreen(),
    Command::Windowed => app.exit_fullscreen(),
    Command::LowLatency => app.toggle_low_latency(),
    Command::Separate => app.toggle_separate_streams(),
    Command::Comments => app.trigger_comments(),
    Command::Channel(url) => app.trigger_channel(url),
    Command::Thumb(index) => app.trigger_thumbnail(index),
    Command::Stop => app.stop(),
    Command::Help => app.say(HELP),
    Command::Quit => app.should_quit = true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(line: &str) -> Command {
    parse_command(line).unwrap().unwrap()
  }

  #[test]
  fn empty_line_is_nothing() {
    assert_eq!(parse_command("   ").unwrap(), None);
  }

  #[test]
  fn bare_text_searches() {
    assert_eq!(parse("lofi hip hop"), Command::Search("lofi hip hop".into()));
    assert_eq!(parse("search  rust async "), Command::Search("rust async".into()));
  }

  #[test]
  fn bare_handle_lists_channel() {
    assert_eq!(parse("@TwoSetViolin"), Command::Channel(Some("https://www.youtube.com/@TwoSetViolin/videos".into())));
    assert_eq!(
      parse("channel TwoSetViolin"),
      Command::Channel(Some("https://www.youtube.com/@TwoSetViolin/videos".into()))
    );
    assert_eq!(parse("channel"), Command::Channel(None));
  }

  #[test]
  fn play_by_index_or_url() {
    assert_eq!(parse("play 3"), Command::Play(PlayTarget::Index(3)));
    assert_eq!(
      parse("https://www.youtube.com/watch?v=abc"),
      Command::Play(PlayTarget::Url("https://www.youtube.com/watch?v=abc".into()))
    );
    assert!(parse_command("play 0").is_err());
    assert!(parse_command("play two").is_err());
  }

  #[test]
  fn quality_labels() {
    assert_eq!(parse("quality 720p60"), Command::Quality(QualityBucket::Q720p60));
    assert_eq!(parse("QUALITY 2K"), Command::Quality(QualityBucket::Q2k));
    assert!(parse_command("quality 4k").is_err());
  }

  #[test]
  fn mode_commands() {
    assert_eq!(parse("fs"), Command::Fullscreen);
    assert_eq!(parse("windowed"), Command::Windowed);
    assert_eq!(parse("ll"), Command::LowLatency);
    assert_eq!(parse("separate"), Command::Separate);
    assert_eq!(parse("detach"), Command::Detach);
    assert_eq!(parse("quit"), Command::Quit);
  }

  #[test]
  fn thumb_requires_index() {
    assert_eq!(parse("thumb 2"), Command::Thumb(2));
    assert!(parse_command("thumb").is_err());
  }
}
