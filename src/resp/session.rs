//! Per-connection RESP state

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheError, CacheResult, Cancellation, Registry, WriteGuard};

/// Upper bound on how long one command waits for a cache's writer token.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// One client connection: its id, the selected cache and a cancellation
/// handle that fires when the connection goes away.
pub struct Session {
  id: u64,
  registry: Arc<Registry>,
  selected: String,
  cancel: Cancellation,
  timeout: Duration,
}

impl Session {
  pub fn new(registry: Arc<Registry>) -> Self {
    let selected = registry.default_name().to_string();
    Self {
      id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
      registry,
      selected,
      cancel: Cancellation::new(),
      timeout: COMMAND_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn selected(&self) -> &str {
    &self.selected
  }

  /// Writer-token owner tag for a command on this connection.
  pub fn tag(&self, cmd: &str) -> String {
    format!("resp-{}-{}", self.id, cmd)
  }

  /// Switch to cache `index` (0 is the default cache).
  pub fn select(&mut self, index: u64) -> CacheResult<()> {
    let cache = self.registry.select(index)?;
    self.selected = cache.name().to_string();
    Ok(())
  }

  /// The selected cache. Looked up per command so a cache deleted through
  /// another surface is noticed.
  pub fn cache(&self) -> CacheResult<Arc<Cache>> {
    self.registry.fetch_cache(&self.selected)
  }

  /// Take the writer token of `cache` for `cmd`, bounded by the command
  /// timeout and by the session's cancellation.
  pub async fn lock<'c>(&self, cache: &'c Cache, cmd: &str) -> CacheResult<WriteGuard<'c>> {
    match tokio::time::timeout(self.timeout, cache.acquire_with(self.tag(cmd), &self.cancel)).await
    {
      Ok(guard) => guard,
      Err(_) => {
        tracing::warn!(
          session = self.id,
          cache = %cache.name(),
          holder = ?cache.owner(),
          "Timed out waiting for writer token"
        );
        Err(CacheError::Canceled)
      }
    }
  }

  /// Cancel anything this session is still waiting on.
  pub fn close(&self) {
    self.cancel.cancel();
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSettings;

  #[test]
  fn test_ids_increase() {
    let registry = Registry::new(CacheSettings::default());
    let a = Session::new(registry.clone());
    let b = Session::new(registry);
    assert!(b.id() > a.id());
    assert_eq!(a.tag("SET"), format!("resp-{}-SET", a.id()));
  }

  #[test]
  fn test_select() {
    let registry = Registry::new(CacheSettings::default());
    let mut session = Session::new(registry.clone());
    assert_eq!(session.selected(), "default");
    assert!(session.select(3).is_err());
    registry.add_cache("3").unwrap();
    session.select(3).unwrap();
    assert_eq!(session.cache().unwrap().name(), "3");
    session.select(0).unwrap();
    assert_eq!(session.selected(), "default");
  }

  #[tokio::test(start_paused = true)]
  async fn test_lock_times_out_while_held() {
    let registry = Registry::new(CacheSettings::default());
    let session = Session::new(registry.clone()).with_timeout(Duration::from_millis(100));
    let cache = session.cache().unwrap();
    let _held = cache.acquire("other").await;
    assert!(matches!(
      session.lock(&cache, "SET").await,
      Err(CacheError::Canceled)
    ));
  }

  #[tokio::test]
  async fn test_closed_session_cannot_lock() {
    let registry = Registry::new(CacheSettings::default());
    let session = Session::new(registry);
    let cache = session.cache().unwrap();
    session.close();
    assert!(matches!(
      session.lock(&cache, "SET").await,
      Err(CacheError::Canceled)
    ));
  }
}
