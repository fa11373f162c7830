//! Tiered metadata extraction with cookie fallback, plus memoized lookups.

use anyhow::Result;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::BrowserAutomation;
use crate::cache::{CachePolicy, MemoCache};
use crate::cookies::write_cookie_file;
use crate::models::{SearchEntry, VideoInfo};
use crate::youtube::{MetadataSource, fetch_bytes, normalize_channel_url, scrape_channel_avatar};

/// Which tier produced the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTier {
  Direct,
  CookieFallback,
}

impl ExtractionTier {
  pub fn label(self) -> &'static str {
    match self {
      ExtractionTier::Direct => "without cookies",
      ExtractionTier::CookieFallback => "with cookies fallback",
    }
  }
}

#[derive(Debug, Clone)]
pub struct Extraction {
  pub tier: ExtractionTier,
  pub info: Arc<VideoInfo>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("direct extraction failed ({direct:#}) and cookie harvest failed: {cause:#}")]
  CookieHarvest { direct: anyhow::Error, cause: anyhow::Error },
  #[error("direct extraction failed ({direct:#}) and the cookie file could not be written: {cause:#}")]
  CookieFile { direct: anyhow::Error, cause: anyhow::Error },
  #[error("extraction failed without cookies ({direct:#}) and with cookies: {cause:#}")]
  Authenticated { direct: anyhow::Error, cause: anyhow::Error },
}

type SearchKey = (String, usize);
type ExtractKey = (String, bool);
type ChannelKey = (String, usize);

/// Memoization slots, one per lookup kind.
pub struct Caches {
  pub search: MemoCache<SearchKey, Arc<Vec<SearchEntry>>>,
  pub extraction: MemoCache<ExtractKey, Arc<VideoInfo>>,
  pub channel: MemoCache<ChannelKey, Arc<Vec<SearchEntry>>>,
  pub thumbnail: MemoCache<String, Arc<Vec<u8>>>,
  pub avatar: MemoCache<String, Option<String>>,
}

impl Caches {
  pub fn new(policy: CachePolicy) -> Self {
    Self {
      search: MemoCache::new(policy),
      extraction: MemoCache::new(policy),
      channel: MemoCache::new(policy),
      thumbnail: MemoCache::new(policy),
      avatar: MemoCache::new(policy),
    }
  }
}

pub struct ExtractionPipeline {
  source: Arc<dyn MetadataSource>,
  browser: Arc<dyn BrowserAutomation>,
  http: Client,
  cookie_file: PathBuf,
  caches: Arc<Caches>,
}

impl ExtractionPipeline {
  pub fn new(
    source: Arc<dyn MetadataSource>,
    browser: Arc<dyn BrowserAutomation>,
    http: Client,
    cookie_file: PathBuf,
    caches: Arc<Caches>,
  ) -> Self {
    Self { source, browser, http, cookie_file, caches }
  }

  /// Memoized extraction keyed by `(url, cookies attached)`.
  pub async fn extract_cached(&self, url: &str, with_cookies: bool) -> Result<Arc<VideoInfo>> {
    let key = (url.to_string(), with_cookies);
    if let Some(hit) = self.caches.extraction.get(&key) {
      debug!(url = %url, with_cookies, "pipeline: extraction cache hit");
      return Ok(hit);
    }
    let cookie_file = with_cookies.then_some(self.cookie_file.as_path());
    let info = Arc::new(self.source.extract(url, cookie_file).await?);
    self.caches.extraction.insert(key, Arc::clone(&info));
    debug!(url = %url, with_cookies, entries = self.caches.extraction.len(), "pipeline: extraction cached");
    Ok(info)
  }

  /// Anonymous extraction first; on failure, harvest cookies (unless a cookie
  /// file already exists) and retry with them.
  pub async fn extract(&self, url: &str) -> Result<Extraction, ExtractError> {
    let direct = match self.extract_cached(url, false).await {
      Ok(info) => {
        info!(url = %url, "pipeline: extracted without cookies");
        return Ok(Extraction { tier: ExtractionTier::Direct, info });
      }
      Err(e) => e,
    };
    warn!(url = %url, err = %format!("{:#}", direct), "pipeline: direct extraction failed, trying cookies");

    if !self.cookie_file.exists() {
      let cookies = match self.browser.collect_cookies(url).await {
        Ok(cookies) => cookies,
        Err(cause) => return Err(ExtractError::CookieHarvest { direct, cause }),
      };
      if let Err(cause) = write_cookie_file(&self.cookie_file, &cookies) {
        return Err(ExtractError::CookieFile { direct, cause });
      }
      info!(path = %self.cookie_file.display(), count = cookies.len(), "pipeline: cookie file written");
    }

    match self.extract_cached(url, true).await {
      Ok(info) => {
        info!(url = %url, "pipeline: extracted with cookies fallback");
        Ok(Extraction { tier: ExtractionTier::CookieFallback, info })
      }
      Err(cause) => Err(ExtractError::Authenticated { direct, cause }),
    }
  }

  pub async fn search(&self, query: &str, limit: usize) -> Result<Arc<Vec<SearchEntry>>> {
    let key = (query.to_string(), limit);
    if let Some(hit) = self.caches.search.get(&key) {
      debug!(query = %query, "pipeline: search cache hit");
      return Ok(hit);
    }
    let results = Arc::new(self.source.search(query, limit).await?);
    self.caches.search.insert(key, Arc::clone(&results));
    Ok(results)
  }

  pub async fn channel_videos(&self, channel_url: &str, limit: usize) -> Result<Arc<Vec<SearchEntry>>> {
    let channel_url = normalize_channel_url(channel_url);
    let key = (channel_url.clone(), limit);
    if let Some(hit) = self.caches.channel.get(&key) {
      debug!(channel = %channel_url, "pipeline: channel cache hit");
      return Ok(hit);
    }
    let results = Arc::new(self.source.channel_videos(&channel_url, limit).await?);
    self.caches.channel.insert(key, Arc::clone(&results));
    Ok(results)
  }

  pub async fn thumbnail(&self, url: &str) -> Result<Arc<Vec<u8>>> {
    let key = url.to_string();
    if let Some(hit) = self.caches.thumbnail.get(&key) {
      return Ok(hit);
    }
    let bytes = Arc::new(fetch_bytes(&self.http, url).await?);
    self.caches.thumbnail.insert(key, Arc::clone(&bytes));
    Ok(bytes)
  }

  /// Avatar image URL for a channel page, `None` if the page has none.
  pub async fn channel_avatar(&self, channel_url: &str) -> Result<Option<String>> {
    let key = channel_url.to_string();
    if let Some(hit) = self.caches.avatar.get(&key) {
      return Ok(hit);
    }
    let avatar = scrape_channel_avatar(&self.http, channel_url).await?;
    self.caches.avatar.insert(key, avatar.clone());
    Ok(avatar)
  }
}
