//! Quality buckets and their yt-dlp format expressions.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

use crate::models::VideoInfo;

/// Named resolution/frame-rate tier. Declaration order is the descending
/// preference order used for default selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityBucket {
  Q2k,
  Q1080p60,
  Q1080p,
  Q720p60,
  Q720p,
  Q360p,
  Q240p,
  Q144p,
}

/// Bucket used when no format qualifies for any tier.
pub const DEFAULT_FLOOR: QualityBucket = QualityBucket::Q360p;

impl QualityBucket {
  pub const ALL: [QualityBucket; 8] = [
    QualityBucket::Q2k,
    QualityBucket::Q1080p60,
    QualityBucket::Q1080p,
    QualityBucket::Q720p60,
    QualityBucket::Q720p,
    QualityBucket::Q360p,
    QualityBucket::Q240p,
    QualityBucket::Q144p,
  ];

  pub fn label(self) -> &'static str {
    match self {
      QualityBucket::Q2k => "2k",
      QualityBucket::Q1080p60 => "1080p60",
      QualityBucket::Q1080p => "1080p",
      QualityBucket::Q720p60 => "720p60",
      QualityBucket::Q720p => "720p",
      QualityBucket::Q360p => "360p",
      QualityBucket::Q240p => "240p",
      QualityBucket::Q144p => "144p",
    }
  }

  /// Format-selection expression passed to mpv as `--ytdl-format`.
  pub fn format_expression(self) -> &'static str {
    match self {
      QualityBucket::Q2k => "bestvideo[height>=1440]+bestaudio/best",
      QualityBucket::Q1080p60 => "bestvideo[height>=1080][fps>=60]+bestaudio/best",
      QualityBucket::Q1080p => "bestvideo[height>=1080]+bestaudio/best",
      QualityBucket::Q720p60 => "bestvideo[height>=720][fps>=60]+bestaudio/best",
      QualityBucket::Q720p => "bestvideo[height>=720][height<1080]+bestaudio/best",
      QualityBucket::Q360p => "bestvideo[height>=360][height<720]+bestaudio/best",
      QualityBucket::Q240p => "bestvideo[height>=240][height<360]+bestaudio/best",
      QualityBucket::Q144p => "bestvideo[height>=144][height<240]+bestaudio/best",
    }
  }

  /// Whether a rendition with this height and frame rate satisfies the tier.
  /// Tiers overlap: a 1080p60 rendition also satisfies plain 1080p.
  pub fn accepts(self, height: u32, fps: f64) -> bool {
    match self {
      QualityBucket::Q2k => height >= 1440,
      QualityBucket::Q1080p60 => height >= 1080 && fps >= 60.0,
      QualityBucket::Q1080p => height >= 1080,
      QualityBucket::Q720p60 => height >= 720 && fps >= 60.0,
      QualityBucket::Q720p => (720..1080).contains(&height),
      QualityBucket::Q360p => (360..720).contains(&height),
      QualityBucket::Q240p => (240..360).contains(&height),
      QualityBucket::Q144p => (144..240).contains(&height),
    }
  }
}

impl fmt::Display for QualityBucket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for QualityBucket {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let needle = s.trim().to_lowercase();
    QualityBucket::ALL
      .into_iter()
      .find(|q| q.label() == needle)
      .ok_or_else(|| anyhow!("Unknown quality '{}'. Expected one of: {}", s.trim(), labels()))
  }
}

fn labels() -> String {
  QualityBucket::ALL.iter().map(|q| q.label()).collect::<Vec<_>>().join(", ")
}

/// Buckets for which at least one format qualifies, in preference order.
/// Falls back to [`DEFAULT_FLOOR`] when nothing qualifies.
pub fn available_buckets(info: &VideoInfo) -> Vec<QualityBucket> {
  let available: Vec<QualityBucket> = QualityBucket::ALL
    .into_iter()
    .filter(|bucket| info.formats.iter().any(|f| bucket.accepts(f.height, f.fps)))
    .collect();
  if available.is_empty() { vec![DEFAULT_FLOOR] } else { available }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::FormatRecord;

  fn info_with(formats: &[(u32, f64)]) -> VideoInfo {
    VideoInfo {
      formats: formats
        .iter()
        .map(|&(height, fps)| FormatRecord { height, fps, has_video: true, ..FormatRecord::default() })
        .collect(),
      ..VideoInfo::default()
    }
  }

  #[test]
  fn thirty_fps_ladder_skips_sixty_fps_tiers() {
    let info = info_with(&[(144, 30.0), (360, 30.0), (720, 30.0), (1080, 30.0), (1440, 30.0)]);
    assert_eq!(
      available_buckets(&info),
      vec![QualityBucket::Q2k, QualityBucket::Q1080p, QualityBucket::Q720p, QualityBucket::Q360p, QualityBucket::Q144p]
    );
  }

  #[test]
  fn sixty_fps_1080_reaches_both_sixty_fps_tiers() {
    let info = info_with(&[(1080, 60.0)]);
    assert_eq!(
      available_buckets(&info),
      vec![QualityBucket::Q1080p60, QualityBucket::Q1080p, QualityBucket::Q720p60]
    );
  }

  #[test]
  fn no_formats_yields_floor() {
    assert_eq!(available_buckets(&VideoInfo::default()), vec![DEFAULT_FLOOR]);
  }

  #[test]
  fn audio_only_formats_yield_floor() {
    let info = info_with(&[(0, 0.0)]);
    assert_eq!(available_buckets(&info), vec![QualityBucket::Q360p]);
  }

  #[test]
  fn gaps_are_not_filled() {
    let info = info_with(&[(1440, 30.0), (144, 30.0)]);
    assert_eq!(
      available_buckets(&info),
      vec![QualityBucket::Q2k, QualityBucket::Q1080p, QualityBucket::Q144p]
    );
  }

  #[test]
  fn parse_labels() {
    assert_eq!("1080p60".parse::<QualityBucket>().unwrap(), QualityBucket::Q1080p60);
    assert_eq!(" 2K ".parse::<QualityBucket>().unwrap(), QualityBucket::Q2k);
    assert!("480p".parse::<QualityBucket>().is_err());
  }

  #[test]
  fn expression_matches_tier() {
    assert_eq!(QualityBucket::Q720p.format_expression(), "bestvideo[height>=720][height<1080]+bestaudio/best");
    assert_eq!(QualityBucket::Q144p.to_string(), "144p");
  }
}
