//! Process-wide cache registry

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::error::{CacheError, CacheResult};
use super::snapshot::SnapshotManager;
use super::stats::CacheStats;
use super::store::{Cache, CacheSettings};

pub const DEFAULT_CACHE: &str = "default";

#[derive(Debug, Clone)]
pub struct RegistryOptions {
  /// Name of the reserved cache created at startup.
  pub default_cache: String,
  /// Whether the reserved cache refuses deletion and TTLs.
  pub protect_default: bool,
}

impl Default for RegistryOptions {
  fn default() -> Self {
    Self {
      default_cache: DEFAULT_CACHE.to_string(),
      protect_default: true,
    }
  }
}

/// Name to cache mapping. The map lock is only held for lookups and
/// inserts, never across cache operations.
pub struct Registry {
  caches: Mutex<BTreeMap<String, Arc<Cache>>>,
  settings: Arc<CacheSettings>,
  options: RegistryOptions,
  me: Weak<Registry>,
}

impl std::fmt::Debug for Registry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Registry")
      .field("caches", &self.list())
      .field("options", &self.options)
      .finish()
  }
}

impl Registry {
  pub fn new(settings: CacheSettings) -> Arc<Self> {
    Self::with_options(settings, RegistryOptions::default())
  }

  pub fn with_options(settings: CacheSettings, options: RegistryOptions) -> Arc<Self> {
    let registry = Arc::new_cyclic(|me: &Weak<Registry>| Self {
      caches: Mutex::new(BTreeMap::new()),
      settings: Arc::new(settings),
      options,
      me: me.clone(),
    });
    let default = Cache::build(
      registry.options.default_cache.clone(),
      registry.options.protect_default,
      registry.settings.clone(),
      registry.me.clone(),
    );
    registry
      .caches
      .lock()
      .insert(registry.options.default_cache.clone(), default);
    tracing::info!(default = %registry.options.default_cache, "Cache registry ready");
    registry
  }

  pub fn settings(&self) -> &CacheSettings {
    &self.settings
  }

  pub fn default_name(&self) -> &str {
    &self.options.default_cache
  }

  pub fn default_cache(&self) -> CacheResult<Arc<Cache>> {
    self.fetch_cache(&self.options.default_cache)
  }

  pub fn add_cache(&self, name: &str) -> CacheResult<Arc<Cache>> {
    validate_name(name)?;
    let mut caches = self.caches.lock();
    if caches.contains_key(name) {
      return Err(CacheError::CacheAlreadyExists(name.to_string()));
    }
    let cache = Cache::build(
      name.to_string(),
      false,
      self.settings.clone(),
      self.me.clone(),
    );
    caches.insert(name.to_string(), cache.clone());
    tracing::info!(cache = %name, "Cache created");
    Ok(cache)
  }

  /// Remove a cache and cancel all of its timers.
  pub fn delete_cache(&self, name: &str) -> CacheResult<()> {
    if self.options.protect_default && name == self.options.default_cache {
      return Err(CacheError::validation(format!(
        "cache '{}' is protected and cannot be deleted",
        name
      )));
    }
    let removed = self
      .caches
      .lock()
      .remove(name)
      .ok_or_else(|| CacheError::not_found(format!("cache {}", name)))?;
    removed.shutdown();
    tracing::info!(cache = %name, "Cache deleted");
    Ok(())
  }

  pub fn fetch_cache(&self, name: &str) -> CacheResult<Arc<Cache>> {
    self
      .caches
      .lock()
      .get(name)
      .cloned()
      .ok_or_else(|| CacheError::not_found(format!("cache {}", name)))
  }

  /// Cache names, sorted.
  pub fn list(&self) -> Vec<String> {
    self.caches.lock().keys().cloned().collect()
  }

  /// Numeric cache selection: 0 is the default cache, any other number is
  /// the cache literally named after it.
  pub fn select(&self, index: u64) -> CacheResult<Arc<Cache>> {
    if index == 0 {
      return self.default_cache();
    }
    self.fetch_cache(&index.to_string())
  }

  /// Schedule destruction of a cache after `ttl`, replacing any earlier TTL.
  pub async fn set_cache_ttl(&self, name: &str, ttl: Duration) -> CacheResult<()> {
    let cache = self.fetch_cache(name)?;
    let mut guard = cache.acquire(format!("registry-ttl-{}", name)).await;
    guard.set_cache_ttl(Some(ttl))?;
    tracing::info!(cache = %name, ttl_ms = ttl.as_millis() as u64, "Cache TTL set");
    Ok(())
  }

  /// Cancel a cache's expiration. No error when none was set.
  pub async fn cancel_cache_expiration(&self, name: &str) -> CacheResult<()> {
    let cache = self.fetch_cache(name)?;
    if cache.expiration().is_none() {
      return Ok(());
    }
    let mut guard = cache.acquire(format!("registry-ttl-{}", name)).await;
    guard.set_cache_ttl(None)
  }

  pub(crate) fn expire_cache(&self, name: &str, deadline: DateTime<Utc>) {
    let mut caches = self.caches.lock();
    let due = caches
      .get(name)
      .is_some_and(|cache| cache.expiration() == Some(deadline));
    if !due {
      return;
    }
    let removed = caches.remove(name);
    drop(caches);
    if let Some(cache) = removed {
      cache.shutdown();
      tracing::info!(cache = %name, "Cache expired");
    }
  }

  /// Write a snapshot of `name` (default cache when absent) while holding
  /// its writer token.
  pub async fn backup(&self, name: Option<&str>, filename: &str) -> CacheResult<PathBuf> {
    let cache = self.fetch_cache(name.unwrap_or(&self.options.default_cache))?;
    let manager = SnapshotManager::new(self.settings.snapshot_dir.clone());
    manager.resolve(filename)?;
    let guard = cache.acquire(format!("backup-{}", cache.name())).await;
    let snapshot = guard.snapshot();
    let path = manager.save(filename, &snapshot).await?;
    guard.release();
    Ok(path)
  }

  /// Load a snapshot into `name` (default cache when absent), creating the
  /// cache if needed. Returns the number of keys installed.
  ///
  /// A past cache expiration rejects the restore before any cache is created,
  /// unless the target is protected and ignores cache expiration anyway.
  pub async fn restore(&self, name: Option<&str>, filename: &str) -> CacheResult<usize> {
    let name = name.unwrap_or(&self.options.default_cache).to_string();
    let manager = SnapshotManager::new(self.settings.snapshot_dir.clone());
    let snapshot = manager.load(filename).await?;
    let protected = self
      .fetch_cache(&name)
      .map(|cache| cache.is_protected())
      .unwrap_or(false);
    if !protected {
      snapshot.live_expiration(Utc::now())?;
    }

    let cache = match self.fetch_cache(&name) {
      Ok(cache) => cache,
      Err(_) => match self.add_cache(&name) {
        Ok(cache) => cache,
        Err(CacheError::CacheAlreadyExists(_)) => self.fetch_cache(&name)?,
        Err(e) => return Err(e),
      },
    };
    let mut guard = cache.acquire(format!("restore-{}", name)).await;
    let installed = guard.restore(snapshot)?;
    tracing::info!(cache = %name, keys = installed, "Cache restored");
    Ok(installed)
  }

  pub fn stats(&self) -> Vec<CacheStats> {
    let caches: Vec<Arc<Cache>> = self.caches.lock().values().cloned().collect();
    caches.iter().map(|c| c.stats()).collect()
  }

  /// Cancel every timer of every cache.
  pub fn shutdown(&self) {
    let caches: Vec<Arc<Cache>> = self.caches.lock().values().cloned().collect();
    for cache in caches {
      cache.shutdown();
    }
  }
}

fn validate_name(name: &str) -> CacheResult<()> {
  if name.trim().is_empty() {
    return Err(CacheError::validation("cache name must not be empty"));
  }
  if name.contains('/') {
    return Err(CacheError::validation(format!(
      "cache name '{}' must not contain '/'",
      name
    )));
  }
  Ok(())
}
