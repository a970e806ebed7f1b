//! Single-shot expiration timers
//!
//! A timer only holds a `Weak` handle to its cache. Scheduling a key that
//! already has a timer aborts the old one first, and the expiry path checks
//! the recorded deadline again under the writer token, so a timer that lost
//! the race with a reset never deletes the resurrected key.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Time left until `deadline`, zero when it already passed.
pub fn until(deadline: DateTime<Utc>) -> Duration {
  (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

/// Sleep until `deadline`, then run `on_fire`. Without a runtime nothing is
/// spawned; reads still hide expired keys and writers purge them.
pub(crate) fn spawn_at<F>(deadline: DateTime<Utc>, on_fire: F) -> Option<JoinHandle<()>>
where
  F: Future<Output = ()> + Send + 'static,
{
  let handle = tokio::runtime::Handle::try_current().ok()?;
  Some(handle.spawn(async move {
    tokio::time::sleep(until(deadline)).await;
    on_fire.await;
  }))
}

#[derive(Debug)]
struct Scheduled {
  deadline: DateTime<Utc>,
  handle: Option<JoinHandle<()>>,
}

impl Scheduled {
  fn abort(self) {
    if let Some(handle) = self.handle {
      handle.abort();
    }
  }
}

/// Timers keyed by top-level key.
#[derive(Debug, Default)]
pub(crate) struct TimerSet {
  timers: HashMap<String, Scheduled>,
}

impl TimerSet {
  pub fn schedule(&mut self, key: &str, deadline: DateTime<Utc>, handle: Option<JoinHandle<()>>) {
    self.cancel(key);
    self
      .timers
      .insert(key.to_string(), Scheduled { deadline, handle });
  }

  pub fn cancel(&mut self, key: &str) -> bool {
    match self.timers.remove(key) {
      Some(timer) => {
        timer.abort();
        true
      }
      None => false,
    }
  }

  /// Drop the bookkeeping for a timer that is firing right now.
  pub fn forget(&mut self, key: &str) {
    self.timers.remove(key);
  }

  pub fn cancel_all(&mut self) {
    for (_, timer) in self.timers.drain() {
      timer.abort();
    }
  }

  pub fn deadline(&self, key: &str) -> Option<DateTime<Utc>> {
    self.timers.get(key).map(|t| t.deadline)
  }

  pub fn len(&self) -> usize {
    self.timers.len()
  }
}
