//! Bounded worker pool for blocking-ish work (yt-dlp, HTTP, browser).
//!
//! Each dispatched task delivers exactly one [`TaskResult`] through a oneshot
//! channel. The control loop polls the receiver with `try_recv`, the same way
//! it polls every other in-flight task.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, oneshot};
use tracing::warn;

#[derive(Debug, Error)]
pub enum TaskError {
  #[error("{0:#}")]
  Failed(anyhow::Error),
  #[error("worker task panicked")]
  Panicked,
  #[error("worker task was cancelled")]
  Cancelled,
}

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Clone)]
pub struct WorkerPool {
  permits: Arc<Semaphore>,
}

impl WorkerPool {
  pub fn new(size: usize) -> Self {
    Self { permits: Arc::new(Semaphore::new(size.max(1))) }
  }

  /// Run `task` once a worker slot is free.
  pub fn dispatch<T, F>(&self, task: F) -> oneshot::Receiver<TaskResult<T>>
  where
    T: Send + 'static,
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
  {
    let (tx, rx) = oneshot::channel();
    let permits = Arc::clone(&self.permits);
    tokio::spawn(async move {
      let Ok(_permit) = permits.acquire_owned().await else {
        let _ = tx.send(Err(TaskError::Cancelled));
        return;
      };
      // Inner spawn so a panic surfaces as a JoinError instead of tearing down this task.
      let outcome = match tokio::spawn(task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskError::Failed(e)),
        Err(e) if e.is_panic() => {
          warn!(err = %e, "worker: task panicked");
          Err(TaskError::Panicked)
        }
        Err(_) => Err(TaskError::Cancelled),
      };
      let _ = tx.send(outcome);
    });
    rx
  }
}

/// Poll a pending task without blocking. Returns `None` while the task is still
/// running and puts the receiver back; returns the outcome once it completes.
pub fn poll_task<T>(slot: &mut Option<oneshot::Receiver<TaskResult<T>>>) -> Option<TaskResult<T>> {
  let mut rx = slot.take()?;
  match rx.try_recv() {
    Ok(result) => Some(result),
    Err(oneshot::error::TryRecvError::Empty) => {
      *slot = Some(rx);
      None
    }
    Err(oneshot::error::TryRecvError::Closed) => Some(Err(TaskError::Cancelled)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::anyhow;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[tokio::test]
  async fn delivers_value() {
    let pool = WorkerPool::new(2);
    let rx = pool.dispatch(async { Ok(21 * 2) });
    assert_eq!(rx.await.unwrap().unwrap(), 42);
  }

  #[tokio::test]
  async fn delivers_error_as_value() {
    let pool = WorkerPool::new(2);
    let rx = pool.dispatch(async { Err::<(), _>(anyhow!("boom")) });
    match rx.await.unwrap() {
      Err(TaskError::Failed(e)) => assert_eq!(e.to_string(), "boom"),
      other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
  }

  #[tokio::test]
  async fn panic_is_captured() {
    let pool = WorkerPool::new(1);
    let rx = pool.dispatch(async {
      if true {
        panic!("worker blew up");
      }
      Ok(())
    });
    assert!(matches!(rx.await.unwrap(), Err(TaskError::Panicked)));
  }

  #[tokio::test]
  async fn concurrency_is_bounded() {
    let pool = WorkerPool::new(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let receivers: Vec<_> = (0..6)
      .map(|_| {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        pool.dispatch(async move {
          let now = running.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(20)).await;
          running.fetch_sub(1, Ordering::SeqCst);
          Ok(())
        })
      })
      .collect();
    for rx in receivers {
      rx.await.unwrap().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
  }

  #[tokio::test]
  async fn poll_task_keeps_pending_receiver() {
    let pool = WorkerPool::new(1);
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let mut slot = Some(pool.dispatch(async move {
      let _ = release_rx.await;
      Ok(5)
    }));
    assert!(poll_task(&mut slot).is_none());
    assert!(slot.is_some());
    release_tx.send(()).unwrap();
    let rx = slot.take().unwrap();
    assert_eq!(rx.await.unwrap().unwrap(), 5);
  }
}
