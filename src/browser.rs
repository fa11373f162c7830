//! Headless browser automation over WebDriver.
//!
//! Used for the two things plain HTTP can't do: harvesting session cookies
//! when anonymous extraction is refused, and reading comments that only
//! render after the page is scrolled. Needs a WebDriver endpoint (e.g.
//! `chromedriver --port=9515`).

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::constants::constants;
use crate::models::{BrowserCookie, CommentRecord};

#[async_trait]
pub trait BrowserAutomation: Send + Sync {
  /// Visit `url` and return the cookies the session ended up with.
  async fn collect_cookies(&self, url: &str) -> Result<Vec<BrowserCookie>>;
  /// Visit `url`, scroll `scroll_steps` times and return every rendered comment.
  async fn scrape_comments(&self, url: &str, scroll_steps: u32) -> Result<Vec<CommentRecord>>;
}

/// Runs in the page; returns one object per comment thread.
const COMMENT_EXTRACT_JS: &str = r##"
return Array.from(document.querySelectorAll("ytd-comment-thread-renderer")).map(function (block) {
  var user = block.querySelector("#author-text");
  var pic = block.querySelector("#author-thumbnail img");
  var text = block.querySelector("#content-text");
  return {
    username: user ? user.textContent.trim() : null,
    avatar_url: pic ? pic.getAttribute("src") : null,
    text: text ? text.textContent.trim() : null
  };
});
"##;

const READY_STATE_JS: &str = "return document.readyState;";

#[derive(Debug, Deserialize)]
struct RawComment {
  username: Option<String>,
  avatar_url: Option<String>,
  text: Option<String>,
}

impl From<RawComment> for CommentRecord {
  fn from(raw: RawComment) -> Self {
    CommentRecord {
      username: raw.username.filter(|s| !s.is_empty()).unwrap_or_else(|| "Unknown".to_string()),
      avatar_url: raw.avatar_url.filter(|s| !s.is_empty()),
      text: raw.text.unwrap_or_default(),
    }
  }
}

/// Decode the comment script's return value, substituting defaults for missing fields.
pub fn parse_comments(value: Value) -> Result<Vec<CommentRecord>> {
  let raw: Vec<RawComment> = serde_json::from_value(value).context("Unexpected comment payload")?;
  Ok(raw.into_iter().map(CommentRecord::from).collect())
}

fn to_browser_cookie(cookie: &fantoccini::cookies::Cookie<'static>, fallback_host: &str) -> BrowserCookie {
  BrowserCookie {
    domain: cookie.domain().map(str::to_string).unwrap_or_else(|| fallback_host.to_string()),
    path: cookie.path().unwrap_or("/").to_string(),
    secure: cookie.secure().unwrap_or(false),
    expires: cookie.expires().and_then(|e| e.datetime()).map(|dt| dt.unix_timestamp()).unwrap_or(0),
    name: cookie.name().to_string(),
    value: cookie.value().to_string(),
  }
}

fn host_of(url: &str) -> String {
  url.split("://").nth(1).unwrap_or(url).split(['/', '?', '#']).next().unwrap_or_default().to_string()
}

pub struct WebDriverBrowser {
  webdriver_url: String,
}

impl WebDriverBrowser {
  pub fn new(webdriver_url: impl Into<String>) -> Self {
    Self { webdriver_url: webdriver_url.into() }
  }

  fn capabilities() -> Map<String, Value> {
    let mut caps = Map::new();
    caps.insert("browserName".to_string(), json!("chrome"));
    caps.insert(
      "goog:chromeOptions".to_string(),
      json!({
        "args": [
          "--headless=new",
          "--no-sandbox",
          "--disable-gpu",
          "--mute-audio",
          "--no-first-run",
          "--no-default-browser-check",
          format!("--user-agent={}", constants().user_agent),
        ],
        "excludeSwitches": ["enable-logging"]
      }),
    );
    caps
  }

  async fn connect(&self) -> Result<Client> {
    ClientBuilder::native()
      .capabilities(Self::capabilities())
      .connect(&self.webdriver_url)
      .await
      .with_context(|| format!("Failed to connect to WebDriver at {}", self.webdriver_url))
  }

  /// Navigate and wait for the document to finish loading, bounded by the page-load timeout.
  async fn open(client: &Client, url: &str) -> Result<()> {
    let limit = Duration::from_secs(constants().page_load_timeout_secs);
    tokio::time::timeout(limit, async {
      client.goto(url).await.with_context(|| format!("Failed to navigate to {}", url))?;
      loop {
        let state = client.execute(READY_STATE_JS, vec![]).await.context("Failed to read document state")?;
        if state.as_str() == Some("complete") {
          return Ok::<(), anyhow::Error>(());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
      }
    })
    .await
    .map_err(|_| anyhow!("Timed out loading {}", url))?
  }

  /// Run `work` against a fresh session and always end the session afterwards.
  async fn with_session<T, F, Fut>(&self, work: F) -> Result<T>
  where
    F: FnOnce(Client) -> Fut + Send,
    Fut: std::future::Future<Output = (Client, Result<T>)> + Send,
    T: Send,
  {
    let client = self.connect().await?;
    let (client, result) = work(client).await;
    if let Err(e) = client.close().await {
      warn!(err = %e, "browser: failed to close WebDriver session");
    }
    result
  }
}

#[async_trait]
impl BrowserAutomation for WebDriverBrowser {
  async fn collect_cookies(&self, url: &str) -> Result<Vec<BrowserCookie>> {
    info!(url = %url, "browser: harvesting cookies");
    let host = host_of(url);
    let url = url.to_string();
    let cookies = self
      .with_session(|client| async move {
        let result = async {
          Self::open(&client, &url).await?;
          tokio::time::sleep(Duration::from_millis(constants().cookie_settle_ms)).await;
          let cookies = client.get_all_cookies().await.context("Failed to read browser cookies")?;
          Ok::<_, anyhow::Error>(cookies.iter().map(|c| to_browser_cookie(c, &host)).collect::<Vec<_>>())
        }
        .await;
        (client, result)
      })
      .await?;
    info!(count = cookies.len(), "browser: cookies collected");
    Ok(cookies)
  }

  async fn scrape_comments(&self, url: &str, scroll_steps: u32) -> Result<Vec<CommentRecord>> {
    let c = constants();
    let url = url.to_string();
    let comments = self
      .with_session(|client| async move {
        let result = async {
          Self::open(&client, &url).await?;
          let mount = client
            .wait()
            .at_most(Duration::from_secs(c.comment_mount_timeout_secs))
            .for_element(Locator::Css("#contents.ytd-item-section-renderer"))
            .await;
          if let Err(e) = mount {
            debug!(err = %e, "browser: comment section did not mount, scraping anyway");
          }
          let scroll_js = format!("window.scrollBy(0, {});", c.scroll_pixels);
          for _ in 0..scroll_steps {
            client.execute(&scroll_js, vec![]).await.context("Failed to scroll page")?;
            tokio::time::sleep(Duration::from_millis(c.scroll_settle_ms)).await;
          }
          let value = client.execute(COMMENT_EXTRACT_JS, vec![]).await.context("Failed to read comments")?;
          parse_comments(value)
        }
        .await;
        (client, result)
      })
      .await?;
    debug!(count = comments.len(), steps = scroll_steps, "browser: comments scraped");
    Ok(comments)
  }
}
