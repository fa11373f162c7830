use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::constants::constants;
use crate::models::{FormatRecord, SearchEntry, VideoInfo};

/// The metadata service the extraction pipeline consumes.
#[async_trait]
pub trait MetadataSource: Send + Sync {
  async fn extract(&self, url: &str, cookie_file: Option<&Path>) -> Result<VideoInfo>;
  async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchEntry>>;
  async fn channel_videos(&self, channel_url: &str, limit: usize) -> Result<Vec<SearchEntry>>;
}

// --- yt-dlp JSON ---

#[derive(Debug, Deserialize, Default)]
struct RawFormat {
  format_id: Option<String>,
  height: Option<u32>,
  fps: Option<f64>,
  vcodec: Option<String>,
  acodec: Option<String>,
  url: Option<String>,
  tbr: Option<f64>,
  abr: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawInfo {
  title: Option<String>,
  description: Option<String>,
  original_url: Option<String>,
  webpage_url: Option<String>,
  uploader: Option<String>,
  uploader_url: Option<String>,
  channel_url: Option<String>,
  #[serde(default)]
  formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize, Default)]
struct RawThumbnail {
  url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawEntry {
  id: Option<String>,
  url: Option<String>,
  title: Option<String>,
  #[serde(default)]
  thumbnails: Vec<RawThumbnail>,
}

#[derive(Debug, Deserialize, Default)]
struct RawPlaylist {
  #[serde(default)]
  entries: Vec<Option<RawEntry>>,
}

/// yt-dlp reports a missing stream as the literal codec `"none"`.
fn codec_present(codec: Option<&str>) -> bool {
  codec != Some("none")
}

fn non_empty(s: Option<String>) -> Option<String> {
  s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse `yt-dlp -J` output for a single video.
pub fn parse_video_info(json: &str, requested_url: &str) -> Result<VideoInfo> {
  let raw: RawInfo = serde_json::from_str(json).context("Failed to parse yt-dlp video JSON")?;
  let formats = raw
    .formats
    .into_iter()
    .filter_map(|f| {
      let url = non_empty(f.url)?;
      Some(FormatRecord {
        format_id: f.format_id.unwrap_or_default(),
        height: f.height.unwrap_or(0),
        fps: f.fps.unwrap_or(0.0),
        has_video: codec_present(f.vcodec.as_deref()),
        has_audio: codec_present(f.acodec.as_deref()),
        url,
        bitrate: f.tbr.or(f.abr),
      })
    })
    .collect();
  Ok(VideoInfo {
    title: non_empty(raw.title).unwrap_or_else(|| "Untitled".to_string()),
    description: non_empty(raw.description).unwrap_or_else(|| "No description available.".to_string()),
    url: non_empty(raw.original_url).or(non_empty(raw.webpage_url)).unwrap_or_else(|| requested_url.to_string()),
    uploader: non_empty(raw.uploader).unwrap_or_else(|| "Unknown Channel".to_string()),
    uploader_url: non_empty(raw.uploader_url).or(non_empty(raw.channel_url)),
    formats,
  })
}

/// Parse `yt-dlp -J --flat-playlist` output into listing entries, keeping at most `limit`.
pub fn parse_listing(json: &str, limit: usize) -> Result<Vec<SearchEntry>> {
  let raw: RawPlaylist = serde_json::from_str(json).context("Failed to parse yt-dlp listing JSON")?;
  Ok(
    raw
      .entries
      .into_iter()
      .flatten()
      .filter_map(|e| {
        let url = non_empty(e.url)?;
        let id = non_empty(e.id).unwrap_or_else(|| url.clone());
        Some(SearchEntry {
          title: non_empty(e.title).unwrap_or_else(|| "Unknown".to_string()),
          id,
          url,
          thumbnail_url: e.thumbnails.into_iter().filter_map(|t| non_empty(t.url)).last(),
        })
      })
      .take(limit)
      .collect(),
  )
}

/// Detect whether user input refers to a YouTube channel.
/// Returns the canonical channel URL if detected, or None for a regular search.
pub fn detect_channel_url(input: &str) -> Option<String> {
  let trimmed = input.trim();

  // "/channel @handle" or "/channel https://..."
  let after_prefix = trimmed.strip_prefix("/channel").map(str::trim_start);

  let candidate = after_prefix.unwrap_or(trimmed);

  // Bare @handle (e.g. "@TwoSetViolin")
  if candidate.starts_with('@') && !candidate.contains(' ') && candidate.len() > 1 {
    return Some(format!("https://www.youtube.com/{}/videos", candidate));
  }

  if (candidate.contains("youtube.com/@") || candidate.contains("youtube.com/channel/"))
    && (candidate.starts_with("http://") || candidate.starts_with("https://"))
  {
    return Some(normalize_channel_url(candidate));
  }

  // Only trigger for the /channel prefix form, not bare text
  if after_prefix.is_some() && !candidate.is_empty() {
    return Some(format!("https://www.youtube.com/@{}/videos", candidate));
  }

  None
}

/// Point channel URLs at their uploads tab so a listing returns videos.
pub fn normalize_channel_url(url: &str) -> String {
  let url = url.trim().trim_end_matches('/');
  if (url.contains("youtube.com/@") || url.contains("youtube.com/channel/")) && !url.contains("/videos") {
    format!("{}/videos", url)
  } else {
    url.to_string()
  }
}

/// Whether the input looks like something to play rather than to search for.
pub fn is_video_url(input: &str) -> bool {
  let s = input.trim();
  (s.starts_with("http://") || s.starts_with("https://"))
    && (s.contains("/watch") || s.contains("youtu.be/") || s.contains("/shorts/") || s.contains("/live/"))
}

/// Swap the largest thumbnail rendition for a medium one; list views don't need maxres.
pub fn low_res_thumbnail(url: &str) -> String {
  url.replace("maxresdefault", "mqdefault")
}

fn decode_entities(value: &str) -> String {
  value
    .replace("&quot;", "\"")
    .replace("&#39;", "'")
    .replace("&#x27;", "'")
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&amp;", "&")
}

/// Attributes of one start tag, names lowercased. Values may be double-quoted,
/// single-quoted or bare.
fn tag_attributes(tag: &str) -> Vec<(String, String)> {
  let mut attrs = Vec::new();
  let mut rest = tag;
  loop {
    rest = rest.trim_start();
    let name_end = rest.find(|c: char| c == '=' || c == '/' || c.is_whitespace()).unwrap_or(rest.len());
    if name_end == 0 {
      match rest.chars().next() {
        Some(c) => {
          rest = &rest[c.len_utf8()..];
          continue;
        }
        None => break,
      }
    }
    let name = rest[..name_end].to_ascii_lowercase();
    rest = rest[name_end..].trim_start();
    let Some(value_start) = rest.strip_prefix('=') else {
      attrs.push((name, String::new()));
      continue;
    };
    let value_start = value_start.trim_start();
    let (value, remaining) = match value_start.chars().next() {
      Some(quote @ ('"' | '\'')) => {
        let body = &value_start[1..];
        match body.find(quote) {
          Some(end) => (&body[..end], &body[end + 1..]),
          None => (body, ""),
        }
      }
      _ => {
        let end = value_start.find(char::is_whitespace).unwrap_or(value_start.len());
        (&value_start[..end], &value_start[end..])
      }
    };
    attrs.push((name, decode_entities(value)));
    rest = remaining;
  }
  attrs
}

/// Pull the `og:image` URL out of a page's HTML.
pub fn extract_og_image(html: &str) -> Option<String> {
  let lower = html.to_ascii_lowercase();
  let mut from = 0;
  while let Some(offset) = lower[from..].find("<meta") {
    let start = from + offset + "<meta".len();
    let end = html[start..].find('>').map_or(html.len(), |i| start + i);
    let attrs = tag_attributes(&html[start..end]);
    let is_og_image =
      attrs.iter().any(|(k, v)| (k == "property" || k == "name") && v.trim().eq_ignore_ascii_case("og:image"));
    if is_og_image
      && let Some((_, content)) = attrs.iter().find(|(k, _)| k == "content")
      && !content.is_empty()
    {
      return Some(content.clone());
    }
    from = end;
  }
  None
}

/// Shared HTTP client: desktop user agent and a short, fixed timeout.
pub fn http_client() -> Result<Client> {
  let c = constants();
  Client::builder()
    .user_agent(&c.user_agent)
    .timeout(Duration::from_secs(c.http_timeout_secs))
    .build()
    .context("Failed to build HTTP client")
}

pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
  let response = client.get(url).send().await.with_context(|| format!("Failed to fetch {}", url))?;
  if !response.status().is_success() {
    return Err(anyhow!("GET {} returned {}", url, response.status()));
  }
  let bytes = response.bytes().await.with_context(|| format!("Failed to read body from {}", url))?;
  Ok(bytes.to_vec())
}

pub async fn scrape_channel_avatar(client: &Client, channel_url: &str) -> Result<Option<String>> {
  let response = client.get(channel_url).send().await.with_context(|| format!("Failed to fetch {}", channel_url))?;
  if !response.status().is_success() {
    return Err(anyhow!("GET {} returned {}", channel_url, response.status()));
  }
  let html = response.text().await.context("Failed to read channel page")?;
  Ok(extract_og_image(&html))
}

/// [`MetadataSource`] backed by the `yt-dlp` executable.
pub struct YtDlp {
  binary: String,
}

impl Default for YtDlp {
  fn default() -> Self {
    Self { binary: "yt-dlp".to_string() }
  }
}

impl YtDlp {
  async fn run_json(&self, args: &[&str]) -> Result<String> {
    let c = constants();
    let socket_timeout = c.socket_timeout_secs.to_string();
    let mut cmd = Command::new(&self.binary);
    cmd
      .args(["-J", "--no-warnings", "--socket-timeout", &socket_timeout, "--user-agent", &c.user_agent])
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    debug!(args = ?args, "yt-dlp: running");

    let output = tokio::time::timeout(Duration::from_secs(c.extract_timeout_secs), cmd.output())
      .await
      .map_err(|_| anyhow!("yt-dlp timed out after {}s", c.extract_timeout_secs))?
      .map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
          anyhow!("yt-dlp not found. Install it with: brew install yt-dlp (macOS) or pip install yt-dlp")
        } else {
          anyhow!(e).context("Failed to execute yt-dlp")
        }
      })?;

    if !output.status.success() {
      return Err(anyhow!("yt-dlp failed: {}", String::from_utf8_lossy(&output.stderr).trim()));
    }
    String::from_utf8(output.stdout).context("yt-dlp output non-UTF8")
  }
}

#[async_trait]
impl MetadataSource for YtDlp {
  async fn extract(&self, url: &str, cookie_file: Option<&Path>) -> Result<VideoInfo> {
    let cookie_arg = cookie_file.map(|p| p.display().to_string());
    let mut args = vec!["--skip-download", "--no-playlist"];
    if let Some(ref path) = cookie_arg {
      args.extend(["--cookies", path.as_str()]);
    }
    args.extend(["--", url]);
    let json = self.run_json(&args).await?;
    parse_video_info(&json, url)
  }

  async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchEntry>> {
    let expr = format!("ytsearch{}:{}", limit, query);
    let json = self.run_json(&["--flat-playlist", "--", &expr]).await?;
    parse_listing(&json, limit)
  }

  async fn channel_videos(&self, channel_url: &str, limit: usize) -> Result<Vec<SearchEntry>> {
    let url = normalize_channel_url(channel_url);
    let range = format!("1:{}", limit.max(1));
    let json = self.run_json(&["--flat-playlist", "--playlist-items", &range, "--", &url]).await?;
    parse_listing(&json, limit)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // --- detect_channel_url ---

  #[test]
  fn channel_bare_handle() {
    assert_eq!(detect_channel_url("@TwoSetViolin"), Some("https://www.youtube.com/@TwoSetViolin/videos".to_string()));
  }

  #[test]
  fn channel_full_url_gets_videos_suffix() {
    assert_eq!(
      detect_channel_url("https://www.youtube.com/@foo/"),
      Some("https://www.youtube.com/@foo/videos".to_string())
    );
    assert_eq!(
      detect_channel_url("https://www.youtube.com/channel/UC123/videos"),
      Some("https://www.youtube.com/channel/UC123/videos".to_string())
    );
  }

  #[test]
  fn channel_prefix_form() {
    assert_eq!(detect_channel_url("/channel foo"), Some("https://www.youtube.com/@foo/videos".to_string()));
  }

  #[test]
  fn plain_query_is_not_channel() {
    assert_eq!(detect_channel_url("lofi hip hop"), None);
    assert_eq!(detect_channel_url("@ with space"), None);
  }

  #[test]
  fn video_url_detection() {
    assert!(is_video_url("https://www.youtube.com/watch?v=abc"));
    assert!(is_video_url("https://youtu.be/abc"));
    assert!(!is_video_url("watch this"));
    assert!(!is_video_url("https://www.youtube.com/@foo"));
  }

  #[test]
  fn thumbnail_downgrade() {
    assert_eq!(
      low_res_thumbnail("https://i.ytimg.com/vi/x/maxresdefault.jpg"),
      "https://i.ytimg.com/vi/x/mqdefault.jpg"
    );
    assert_eq!(low_res_thumbnail("https://i.ytimg.com/vi/x/hq720.jpg"), "https://i.ytimg.com/vi/x/hq720.jpg");
  }

  #[test]
  fn og_image_found() {
    let html = concat!(
      r#"<head><meta property="og:title" content="t">"#,
      r#"<meta property="og:image" content="https://yt3.example/a=s900&amp;b"></head>"#
    );
    assert_eq!(extract_og_image(html), Some("https://yt3.example/a=s900&b".to_string()));
    assert_eq!(extract_og_image("<head></head>"), None);
  }

  #[test]
  fn og_image_single_quoted_and_reordered() {
    let html = "<META content='https://yt3.example/x.jpg' property='og:image' />";
    assert_eq!(extract_og_image(html), Some("https://yt3.example/x.jpg".to_string()));
  }

  #[test]
  fn og_image_unquoted_value() {
    let html = "<meta property=og:image content=https://yt3.example/y.jpg>";
    assert_eq!(extract_og_image(html), Some("https://yt3.example/y.jpg".to_string()));
  }

  #[test]
  fn og_image_empty_content_is_none() {
    assert_eq!(extract_og_image(r#"<meta property="og:image" content="">"#), None);
    assert_eq!(extract_og_image(r#"<meta property="og:image:width" content="900">"#), None);
  }

  // --- JSON parsing ---

  #[test]
  fn video_info_with_defaults() {
    let json = r#"{
      "title": "Clip",
      "webpage_url": "https://www.youtube.com/watch?v=abc",
      "formats": [
        {"format_id": "140", "acodec": "mp4a.40.2", "vcodec": "none", "url": "https://cdn/a", "abr": 129.5},
        {"format_id": "299", "height": 1080, "fps": 60, "acodec": "none", "vcodec": "avc1", "url": "https://cdn/v"},
        {"format_id": "sb0", "height": 90, "url": ""}
      ]
    }"#;
    let info = parse_video_info(json, "https://youtu.be/abc").unwrap();
    assert_eq!(info.title, "Clip");
    assert_eq!(info.url, "https://www.youtube.com/watch?v=abc");
    assert_eq!(info.uploader, "Unknown Channel");
    assert_eq!(info.description, "No description available.");
    assert_eq!(info.formats.len(), 2);
    assert!(info.formats[0].is_audio_only());
    assert_eq!(info.formats[0].bitrate, Some(129.5));
    assert!(info.formats[1].is_video_only());
    assert_eq!(info.formats[1].height, 1080);
    assert_eq!(info.formats[1].fps, 60.0);
  }

  #[test]
  fn video_info_prefers_original_url() {
    let json = r#"{"original_url": "https://youtu.be/abc", "webpage_url": "https://www.youtube.com/watch?v=abc"}"#;
    let info = parse_video_info(json, "x").unwrap();
    assert_eq!(info.url, "https://youtu.be/abc");
    assert_eq!(info.title, "Untitled");
  }

  #[test]
  fn video_info_rejects_garbage() {
    assert!(parse_video_info("<html>", "x").is_err());
  }

  #[test]
  fn listing_skips_entries_without_url_and_limits() {
    let json = r#"{"entries": [
      {"id": "a", "url": "https://www.youtube.com/watch?v=a", "title": "A",
       "thumbnails": [{"url": "https://i/a/small.jpg"}, {"url": "https://i/a/big.jpg"}]},
      {"id": "b", "title": "no url"},
      null,
      {"id": "c", "url": "https://www.youtube.com/watch?v=c"},
      {"id": "d", "url": "https://www.youtube.com/watch?v=d", "title": "D"}
    ]}"#;
    let entries = parse_listing(json, 2).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].thumbnail_url.as_deref(), Some("https://i/a/big.jpg"));
    assert_eq!(entries[1].id, "c");
    assert_eq!(entries[1].title, "Unknown");
    assert_eq!(entries[1].thumbnail_url, None);
  }
}
