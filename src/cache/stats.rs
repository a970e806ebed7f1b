//! Per-cache activity counters

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a cache's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
  pub name: String,
  pub keys: usize,
  pub triggers: usize,
  pub size_bytes: usize,
  /// Remaining cache lifetime, absent when no cache TTL is set.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ttl_ms: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_accessed: Option<DateTime<Utc>>,
  pub activity_count: u64,
  pub trigger_firings: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Activity {
  count: AtomicU64,
  firings: AtomicU64,
  last_accessed: Mutex<Option<DateTime<Utc>>>,
}

impl Activity {
  pub fn touch(&self) {
    self.count.fetch_add(1, Ordering::Relaxed);
    *self.last_accessed.lock() = Some(Utc::now());
  }

  pub fn record_firing(&self) {
    self.firings.fetch_add(1, Ordering::Relaxed);
  }

  pub fn count(&self) -> u64 {
    self.count.load(Ordering::Relaxed)
  }

  pub fn firings(&self) -> u64 {
    self.firings.load(Ordering::Relaxed)
  }

  pub fn last_accessed(&self) -> Option<DateTime<Utc>> {
    *self.last_accessed.lock()
  }
}
