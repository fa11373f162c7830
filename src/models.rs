/// One downloadable rendition of a video as reported by the extractor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormatRecord {
  pub format_id: String,
  /// Pixel height, `0` when unknown or audio-only.
  pub height: u32,
  /// Frames per second, `0.0` when unknown.
  pub fps: f64,
  pub has_video: bool,
  pub has_audio: bool,
  /// Direct stream URL.
  pub url: String,
  /// Total bitrate in kbit/s if reported.
  pub bitrate: Option<f64>,
}

impl FormatRecord {
  pub fn is_video_only(&self) -> bool {
    self.has_video && !self.has_audio
  }

  pub fn is_audio_only(&self) -> bool {
    self.has_audio && !self.has_video
  }
}

/// Metadata for a single video. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoInfo {
  pub title: String,
  pub description: String,
  /// Page URL handed to mpv (which re-resolves it through its ytdl hook).
  pub url: String,
  pub uploader: String,
  pub uploader_url: Option<String>,
  pub formats: Vec<FormatRecord>,
}

/// A single entry from a search or channel listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchEntry {
  pub title: String,
  pub id: String,
  pub url: String,
  pub thumbnail_url: Option<String>,
}

/// A scraped comment. There is no stable server-side id, see [`CommentRecord::dedup_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRecord {
  pub username: String,
  pub avatar_url: Option<String>,
  pub text: String,
}

/// Stand-in identity for a comment: `(username, text)`.
pub type CommentDedupKey = (String, String);

impl CommentRecord {
  pub fn dedup_key(&self) -> CommentDedupKey {
    (self.username.clone(), self.text.clone())
  }
}

/// A cookie collected from a browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
  pub domain: String,
  pub path: String,
  pub secure: bool,
  /// Expiry as unix seconds, `0` for session cookies.
  pub expires: i64,
  pub name: String,
  pub value: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn format(has_video: bool, has_audio: bool) -> FormatRecord {
    FormatRecord { has_video, has_audio, ..FormatRecord::default() }
  }

  #[test]
  fn format_stream_kinds() {
    assert!(format(true, false).is_video_only());
    assert!(format(false, true).is_audio_only());
    assert!(!format(true, true).is_video_only());
    assert!(!format(true, true).is_audio_only());
  }

  #[test]
  fn dedup_key_ignores_avatar() {
    let a = CommentRecord { username: "ann".into(), avatar_url: Some("x".into()), text: "hi".into() };
    let b = CommentRecord { avatar_url: None, ..a.clone() };
    assert_eq!(a.dedup_key(), b.dedup_key());
  }
}
