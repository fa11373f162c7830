//! Incremental comment loading.
//!
//! Each load re-opens the page and scrolls deeper than the last one, so the
//! scrape returns everything seen so far plus whatever new threads rendered.
//! The `seen` set filters that back down to the new comments only.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::browser::BrowserAutomation;
use crate::constants::constants;
use crate::models::{CommentDedupKey, CommentRecord};
use crate::worker::{TaskResult, WorkerPool, poll_task};

/// Scrape at `scroll_depth` and return only comments not already in `seen`,
/// recording their keys.
pub async fn load_more(
  browser: &dyn BrowserAutomation,
  video_url: &str,
  scroll_depth: u32,
  seen: &mut HashSet<CommentDedupKey>,
) -> Result<Vec<CommentRecord>> {
  let steps = constants().scrolls_per_depth.saturating_mul(scroll_depth);
  let scraped = browser.scrape_comments(video_url, steps).await?;
  let total = scraped.len();
  let fresh: Vec<CommentRecord> = scraped.into_iter().filter(|c| seen.insert(c.dedup_key())).collect();
  debug!(url = %video_url, scroll_depth, total, new = fresh.len(), "comments: page scraped");
  Ok(fresh)
}

#[derive(Debug)]
pub enum CommentUpdate {
  Loaded(Vec<CommentRecord>),
  /// The last load produced nothing new; no further loads will run.
  Exhausted,
  Failed(String),
}

type LoadOutcome = (Vec<CommentRecord>, HashSet<CommentDedupKey>);

pub struct CommentPaginator {
  video_url: Option<String>,
  scroll_depth: u32,
  seen: HashSet<CommentDedupKey>,
  loading: bool,
  exhausted: bool,
  pending: Option<oneshot::Receiver<TaskResult<LoadOutcome>>>,
}

impl Default for CommentPaginator {
  fn default() -> Self {
    Self { video_url: None, scroll_depth: 1, seen: HashSet::new(), loading: false, exhausted: false, pending: None }
  }
}

impl CommentPaginator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start over for a different video. A load still in flight for the old
  /// video is dropped.
  pub fn reset(&mut self, video_url: impl Into<String>) {
    *self = Self { video_url: Some(video_url.into()), ..Self::default() };
  }

  pub fn is_exhausted(&self) -> bool {
    self.exhausted
  }

  /// Dispatch the next load. Returns `false` (and does nothing) if a load is
  /// already running, the comments are exhausted, or no video is set.
  pub fn trigger(&mut self, pool: &WorkerPool, browser: Arc<dyn BrowserAutomation>) -> bool {
    if self.loading || self.exhausted {
      return false;
    }
    let Some(url) = self.video_url.clone() else { return false };
    let depth = self.scroll_depth;
    self.scroll_depth += 1;
    self.loading = true;
    let mut seen = self.seen.clone();
    info!(url = %url, depth, "comments: loading more");
    self.pending = Some(pool.dispatch(async move {
      let fresh = load_more(browser.as_ref(), &url, depth, &mut seen).await?;
      Ok::<_, anyhow::Error>((fresh, seen))
    }));
    true
  }

  /// Collect a finished load, if any.
  pub fn poll(&mut self) -> Option<CommentUpdate> {
    let result = poll_task(&mut self.pending)?;
    self.loading = false;
    Some(match result {
      Ok((fresh, _)) if fresh.is_empty() => {
        info!(depth = self.scroll_depth - 1, "comments: no new comments, stopping");
        self.exhausted = true;
        CommentUpdate::Exhausted
      }
      Ok((fresh, seen)) => {
        self.seen = seen;
        CommentUpdate::Loaded(fresh)
      }
      Err(e) => CommentUpdate::Failed(e.to_string()),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::BrowserCookie;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use tokio::sync::Notify;

  fn comment(user: &str, text: &str) -> CommentRecord {
    CommentRecord { username: user.into(), avatar_url: None, text: text.into() }
  }

  /// Returns `pages[n]` on the n-th scrape (last page repeats), optionally
  /// blocking each scrape until `release` is notified.
  struct PagedBrowser {
    pages: Vec<Vec<CommentRecord>>,
    calls: AtomicUsize,
    steps: parking_lot::Mutex<Vec<u32>>,
    release: Option<Arc<Notify>>,
  }

  impl PagedBrowser {
    fn new(pages: Vec<Vec<CommentRecord>>) -> Self {
      Self { pages, calls: AtomicUsize::new(0), steps: parking_lot::Mutex::new(Vec::new()), release: None }
    }
  }

  #[async_trait]
  impl BrowserAutomation for PagedBrowser {
    async fn collect_cookies(&self, _url: &str) -> Result<Vec<BrowserCookie>> {
      Ok(Vec::new())
    }

    async fn scrape_comments(&self, _url: &str, scroll_steps: u32) -> Result<Vec<CommentRecord>> {
      let n = self.calls.fetch_add(1, Ordering::SeqCst);
      self.steps.lock().push(scroll_steps);
      if let Some(release) = &self.release {
        release.notified().await;
      }
      Ok(self.pages[n.min(self.pages.len() - 1)].clone())
    }
  }

  async fn wait_for_update(paginator: &mut CommentPaginator) -> CommentUpdate {
    for _ in 0..200 {
      if let Some(update) = paginator.poll() {
        return update;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("comment load never completed");
  }

  #[tokio::test]
  async fn second_load_returns_only_new_comments() {
    let browser = PagedBrowser::new(vec![
      vec![comment("a", "1"), comment("b", "2")],
      vec![comment("a", "1"), comment("b", "2"), comment("c", "3")],
    ]);
    let mut seen = HashSet::new();
    let first = load_more(&browser, "u", 1, &mut seen).await.unwrap();
    assert_eq!(first.len(), 2);
    let second = load_more(&browser, "u", 2, &mut seen).await.unwrap();
    assert_eq!(second, vec![comment("c", "3")]);
    assert_eq!(seen.len(), 3);
    let per_depth = constants().scrolls_per_depth;
    assert_eq!(*browser.steps.lock(), vec![per_depth, per_depth * 2]);
  }

  #[tokio::test]
  async fn duplicates_within_one_page_are_collapsed() {
    let browser = PagedBrowser::new(vec![vec![comment("a", "same"), comment("a", "same"), comment("b", "same")]]);
    let mut seen = HashSet::new();
    assert_eq!(load_more(&browser, "u", 1, &mut seen).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn trigger_while_loading_is_noop() {
    let release = Arc::new(Notify::new());
    let paged = PagedBrowser::new(vec![vec![comment("a", "1")]]);
    let browser = Arc::new(PagedBrowser { release: Some(Arc::clone(&release)), ..paged });
    let pool = WorkerPool::new(4);
    let mut paginator = CommentPaginator::new();
    paginator.reset("https://youtu.be/x");

    assert!(paginator.trigger(&pool, browser.clone()));
    assert!(!paginator.trigger(&pool, browser.clone()));
    assert!(!paginator.trigger(&pool, browser.clone()));
    assert_eq!(paginator.scroll_depth, 2);

    // Wait until the scrape is parked, then let it finish.
    while browser.calls.load(Ordering::SeqCst) == 0 {
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
    release.notify_one();
    assert!(matches!(wait_for_update(&mut paginator).await, CommentUpdate::Loaded(c) if c.len() == 1));
    assert_eq!(browser.calls.load(Ordering::SeqCst), 1);
    assert!(!paginator.loading);
  }

  #[tokio::test]
  async fn empty_page_exhausts() {
    let browser = Arc::new(PagedBrowser::new(vec![vec![comment("a", "1")], vec![comment("a", "1")]]));
    let pool = WorkerPool::new(2);
    let mut paginator = CommentPaginator::new();
    paginator.reset("u");

    assert!(paginator.trigger(&pool, browser.clone()));
    assert!(matches!(wait_for_update(&mut paginator).await, CommentUpdate::Loaded(_)));
    assert!(paginator.trigger(&pool, browser.clone()));
    assert!(matches!(wait_for_update(&mut paginator).await, CommentUpdate::Exhausted));
    assert!(paginator.is_exhausted());
    assert!(!paginator.trigger(&pool, browser.clone()));
    assert_eq!(browser.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn reset_drops_pending_load() {
    let release = Arc::new(Notify::new());
    let paged = PagedBrowser::new(vec![vec![comment("a", "1")]]);
    let browser = Arc::new(PagedBrowser { release: Some(Arc::clone(&release)), ..paged });
    let pool = WorkerPool::new(2);
    let mut paginator = CommentPaginator::new();
    paginator.reset("old");
    assert!(paginator.trigger(&pool, browser.clone()));
    paginator.reset("new");
    assert!(!paginator.loading);
    assert_eq!(paginator.scroll_depth, 1);
    release.notify_one();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(paginator.poll().is_none());
  }

  #[test]
  fn trigger_without_video_is_noop() {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
      let pool = WorkerPool::new(1);
      let mut paginator = CommentPaginator::new();
      assert!(!paginator.trigger(&pool, Arc::new(PagedBrowser::new(vec![vec![]]))));
    });
  }
}
