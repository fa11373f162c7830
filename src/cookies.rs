//! Netscape cookie-file writer used for the authenticated extraction tier.
//!
//! Format: one header comment line, then one tab-separated record per cookie:
//! `domain  flag  path  secure  expiry  name  value`. `flag` is `TRUE` iff the
//! domain starts with `.` (cookie applies to subdomains). yt-dlp and mpv's
//! ytdl hook both read this format through `--cookies`.

use anyhow::{Context, Result};
use std::path::Path;

use crate::models::BrowserCookie;

pub const COOKIE_FILE_HEADER: &str = "# Netscape HTTP Cookie File";

fn flag(b: bool) -> &'static str {
  if b { "TRUE" } else { "FALSE" }
}

/// Serialize one cookie as a cookie-file record (no trailing newline).
pub fn cookie_line(cookie: &BrowserCookie) -> String {
  format!(
    "{}\t{}\t{}\t{}\t{}\t{}\t{}",
    cookie.domain,
    flag(cookie.domain.starts_with('.')),
    cookie.path,
    flag(cookie.secure),
    cookie.expires,
    cookie.name,
    cookie.value
  )
}

/// Render a complete cookie file.
pub fn render_cookie_file(cookies: &[BrowserCookie]) -> String {
  let mut out = String::from(COOKIE_FILE_HEADER);
  out.push('\n');
  for cookie in cookies {
    out.push_str(&cookie_line(cookie));
    out.push('\n');
  }
  out
}

/// Write cookies to `path`, creating parent directories. The file is written
/// to a sibling temp path and renamed so a reader never sees a partial file.
pub fn write_cookie_file(path: &Path, cookies: &[BrowserCookie]) -> Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
  }
  let tmp_path = path.with_extension("txt.part");
  std::fs::write(&tmp_path, render_cookie_file(cookies))
    .with_context(|| format!("Failed to write cookie file {}", tmp_path.display()))?;
  std::fs::rename(&tmp_path, path).with_context(|| format!("Failed to finalize cookie file {}", path.display()))?;
  Ok(())
}
