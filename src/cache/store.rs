//! The cache object
//!
//! Each cache keeps two copies of its state. Writers take the single writer
//! token (a FIFO-fair async mutex) and mutate a private draft; after every
//! top-level operation the draft is published as a new `Arc<CacheState>`.
//! Readers clone the published `Arc` and never wait on the writer, so they
//! observe either all or none of a Patch.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::command::Command;
use super::error::{CacheError, CacheResult};
use super::path::Path;
use super::patch::PatchOp;
use super::registry::Registry;
use super::snapshot::{timestamp, Snapshot, SnapshotManager};
use super::stats::{Activity, CacheStats};
use super::timer::{self, TimerSet};
use super::tree::Tree;
use super::trigger::{Trigger, TriggerStore};
use super::value::Value;

pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 64;

/// Settings shared by every cache of a registry.
#[derive(Debug, Clone)]
pub struct CacheSettings {
  pub max_cascade_depth: usize,
  pub snapshot_dir: PathBuf,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
      snapshot_dir: PathBuf::from("./backups"),
    }
  }
}

/// Everything a cache observably holds.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
  pub(crate) tree: Tree,
  pub(crate) key_expirations: Arc<BTreeMap<String, DateTime<Utc>>>,
  pub(crate) triggers: Arc<TriggerStore>,
  pub(crate) expiration: Option<DateTime<Utc>>,
}

impl CacheState {
  fn is_live(&self, top: &str, now: DateTime<Utc>) -> bool {
    match self.key_expirations.get(top) {
      Some(at) => *at > now,
      None => true,
    }
  }

  /// Value at `path`, hiding keys whose expiration already passed.
  pub fn lookup(&self, path: &Path, now: DateTime<Utc>) -> CacheResult<&Value> {
    if !self.is_live(path.top(), now) {
      return Err(CacheError::not_found(path));
    }
    self.tree.lookup(path)
  }

  pub fn keys(&self, now: DateTime<Utc>) -> Vec<String> {
    self
      .tree
      .keys()
      .filter(|k| self.is_live(k, now))
      .cloned()
      .collect()
  }

  pub fn tree(&self) -> &Tree {
    &self.tree
  }

  pub fn key_expiration(&self, top: &str) -> Option<DateTime<Utc>> {
    self.key_expirations.get(top).copied()
  }

  pub fn triggers(&self) -> &TriggerStore {
    &self.triggers
  }

  pub fn expiration(&self) -> Option<DateTime<Utc>> {
    self.expiration
  }
}

/// Cancellation handle passed alongside a request.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
  inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
  flag: AtomicBool,
  notify: Notify,
}

impl Cancellation {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.inner.flag.store(true, Ordering::SeqCst);
    self.inner.notify.notify_waiters();
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.flag.load(Ordering::SeqCst)
  }

  pub async fn cancelled(&self) {
    loop {
      let notified = self.inner.notify.notified();
      if self.is_cancelled() {
        return;
      }
      notified.await;
    }
  }
}

/// A named, independently locked key-value cache.
pub struct Cache {
  name: String,
  protected: bool,
  settings: Arc<CacheSettings>,
  published: RwLock<Arc<CacheState>>,
  writer: tokio::sync::Mutex<CacheState>,
  owner: Mutex<Option<String>>,
  pub(super) timers: Mutex<TimerSet>,
  cache_timer: Mutex<Option<JoinHandle<()>>>,
  pub(super) activity: Activity,
  registry: Weak<Registry>,
  me: Weak<Cache>,
}

impl std::fmt::Debug for Cache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Cache")
      .field("name", &self.name)
      .field("protected", &self.protected)
      .finish()
  }
}

impl Cache {
  /// A standalone cache, not owned by any registry.
  pub fn new(name: impl Into<String>, settings: Arc<CacheSettings>) -> Arc<Self> {
    Self::build(name.into(), false, settings, Weak::new())
  }

  pub(crate) fn build(
    name: String,
    protected: bool,
    settings: Arc<CacheSettings>,
    registry: Weak<Registry>,
  ) -> Arc<Self> {
    Arc::new_cyclic(|me| Self {
      name,
      protected,
      settings,
      published: RwLock::new(Arc::new(CacheState::default())),
      writer: tokio::sync::Mutex::new(CacheState::default()),
      owner: Mutex::new(None),
      timers: Mutex::new(TimerSet::default()),
      cache_timer: Mutex::new(None),
      activity: Activity::default(),
      registry,
      me: me.clone(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Protected caches cannot be deleted or given a TTL.
  pub fn is_protected(&self) -> bool {
    self.protected
  }

  pub fn settings(&self) -> &CacheSettings {
    &self.settings
  }

  pub(crate) fn snapshots(&self) -> SnapshotManager {
    SnapshotManager::new(self.settings.snapshot_dir.clone())
  }

  /// Tag of the current writer, if any.
  pub fn owner(&self) -> Option<String> {
    self.owner.lock().clone()
  }

  // ==========================================================================
  // Readers
  // ==========================================================================

  /// The last published state.
  pub fn view(&self) -> Arc<CacheState> {
    self.activity.touch();
    self.published.read().clone()
  }

  pub fn get(&self, key: &str) -> CacheResult<Value> {
    let path = Path::parse(key)?;
    self.view().lookup(&path, Utc::now()).cloned()
  }

  /// Ordered lookups against one consistent view.
  pub fn batch_get(&self, keys: &[String]) -> Vec<CacheResult<Value>> {
    let view = self.view();
    let now = Utc::now();
    keys
      .iter()
      .map(|key| {
        let path = Path::parse(key)?;
        view.lookup(&path, now).cloned()
      })
      .collect()
  }

  pub fn exists(&self, key: &str) -> bool {
    self.get(key).is_ok()
  }

  /// Live top-level keys, sorted.
  pub fn keys(&self) -> Vec<String> {
    self.view().keys(Utc::now())
  }

  pub fn len(&self) -> usize {
    self.keys().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Remaining lifetime of a top-level key. `Ok(None)` means no TTL.
  pub fn key_ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
    let path = Path::parse(key)?;
    let view = self.view();
    let now = Utc::now();
    let top = Path::parse(path.top())?;
    view.lookup(&top, now)?;
    Ok(view.key_expiration(path.top()).map(timer::until))
  }

  pub fn triggers(&self) -> Vec<Trigger> {
    self.view().triggers.list()
  }

  pub fn trigger(&self, id: &str) -> Option<Trigger> {
    self.view().triggers.get(id).cloned()
  }

  pub fn expiration(&self) -> Option<DateTime<Utc>> {
    self.published.read().expiration
  }

  pub fn stats(&self) -> CacheStats {
    let view = self.published.read().clone();
    let now = Utc::now();
    CacheStats {
      name: self.name.clone(),
      keys: view.keys(now).len(),
      triggers: view.triggers.len(),
      size_bytes: view.tree.approximate_size(),
      ttl_ms: view
        .expiration
        .map(|at| (at - now).num_milliseconds().max(0)),
      last_accessed: self.activity.last_accessed(),
      activity_count: self.activity.count(),
      trigger_firings: self.activity.firings(),
    }
  }

  // ==========================================================================
  // Writer token
  // ==========================================================================

  /// Wait for the writer token. Waiters are served in arrival order.
  pub async fn acquire(&self, owner: impl Into<String>) -> WriteGuard<'_> {
    let state = self.writer.lock().await;
    self.enter(state, owner.into(), None)
  }

  /// Like `acquire`, but gives up with `Canceled` if `cancel` fires first.
  pub async fn acquire_with(
    &self,
    owner: impl Into<String>,
    cancel: &Cancellation,
  ) -> CacheResult<WriteGuard<'_>> {
    if cancel.is_cancelled() {
      return Err(CacheError::Canceled);
    }
    tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(CacheError::Canceled),
      state = self.writer.lock() => Ok(self.enter(state, owner.into(), Some(cancel.clone()))),
    }
  }

  fn enter<'a>(
    &'a self,
    state: tokio::sync::MutexGuard<'a, CacheState>,
    owner: String,
    cancel: Option<Cancellation>,
  ) -> WriteGuard<'a> {
    *self.owner.lock() = Some(owner.clone());
    self.activity.touch();
    tracing::trace!(cache = %self.name, owner = %owner, "Writer token acquired");
    let mut guard = WriteGuard {
      cache: self,
      state,
      owner,
      changes: Vec::new(),
      removed: Vec::new(),
      cancel,
    };
    guard.purge_expired();
    guard
  }

  // ==========================================================================
  // Timers
  // ==========================================================================

  pub(super) fn schedule_key_expiry(&self, key: &str, deadline: DateTime<Utc>) {
    let cache = self.me.clone();
    let owned = key.to_string();
    let handle = timer::spawn_at(deadline, async move {
      if let Some(cache) = cache.upgrade() {
        cache.expire_key(&owned, deadline).await;
      }
    });
    self.timers.lock().schedule(key, deadline, handle);
  }

  async fn expire_key(&self, key: &str, deadline: DateTime<Utc>) {
    let mut guard = self.acquire(format!("ttl-{}", key)).await;
    guard.expire_if_due(key, deadline);
  }

  fn schedule_cache_expiry(&self, at: Option<DateTime<Utc>>) {
    let mut slot = self.cache_timer.lock();
    if let Some(handle) = slot.take() {
      handle.abort();
    }
    if let Some(at) = at {
      let registry = self.registry.clone();
      let name = self.name.clone();
      *slot = timer::spawn_at(at, async move {
        if let Some(registry) = registry.upgrade() {
          registry.expire_cache(&name, at);
        }
      });
    }
  }

  /// Cancel every timer this cache owns.
  pub(crate) fn shutdown(&self) {
    self.timers.lock().cancel_all();
    if let Some(handle) = self.cache_timer.lock().take() {
      handle.abort();
    }
    tracing::debug!(cache = %self.name, "Cache timers cancelled");
  }
}

/// Exclusive write access to a cache. Dropping the guard releases the token.
pub struct WriteGuard<'a> {
  pub(super) cache: &'a Cache,
  pub(super) state: tokio::sync::MutexGuard<'a, CacheState>,
  owner: String,
  pub(super) changes: Vec<Path>,
  removed: Vec<String>,
  cancel: Option<Cancellation>,
}

impl<'a> WriteGuard<'a> {
  pub fn owner(&self) -> &str {
    &self.owner
  }

  pub fn cache(&self) -> &'a Cache {
    self.cache
  }

  /// Release the writer token.
  pub fn release(self) {}

  /// Read through the draft, which may be ahead of what readers see.
  pub fn get(&self, key: &str) -> CacheResult<Value> {
    let path = Path::parse(key)?;
    self.state.lookup(&path, Utc::now()).cloned()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.get(key).is_ok()
  }

  pub fn keys(&self) -> Vec<String> {
    self.state.keys(Utc::now())
  }

  pub fn key_ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
    let path = Path::parse(key)?;
    let top = Path::parse(path.top())?;
    self.state.lookup(&top, Utc::now())?;
    Ok(self.state.key_expiration(path.top()).map(timer::until))
  }

  pub(super) fn check_canceled(&self) -> CacheResult<()> {
    match &self.cancel {
      Some(cancel) if cancel.is_cancelled() => Err(CacheError::Canceled),
      _ => Ok(()),
    }
  }

  // ==========================================================================
  // Data operations
  // ==========================================================================

  pub fn create(&mut self, key: &str, value: impl Into<Value>) -> CacheResult<()> {
    self.create_batch(vec![(key.to_string(), value.into())])
  }

  /// Install every entry or none of them.
  pub fn create_batch(&mut self, entries: Vec<(String, Value)>) -> CacheResult<()> {
    let parsed = parse_entries(entries)?;
    self.commit_scratch(|edit| {
      for (path, value) in parsed {
        edit.create(&path, value)?;
      }
      Ok(())
    })
  }

  /// Upsert; intermediate mappings are created as needed.
  pub fn replace(&mut self, key: &str, value: impl Into<Value>) -> CacheResult<()> {
    let path = Path::parse(key)?;
    let result = self.edit().write(&path, value.into());
    self.finish(result)
  }

  /// Replace several existing paths. Nothing is written unless every path
  /// exists and every write succeeds.
  pub fn replace_batch(&mut self, entries: Vec<(String, Value)>) -> CacheResult<()> {
    let parsed = parse_entries(entries)?;
    if let Some((missing, _)) = parsed.iter().find(|(p, _)| !self.state.tree.contains(p)) {
      return Err(CacheError::not_found(missing));
    }
    self.commit_scratch(|edit| {
      for (path, value) in parsed {
        edit.write(&path, value)?;
      }
      Ok(())
    })
  }

  /// Remove each key; wildcards remove every match, missing keys are ignored.
  pub fn delete(&mut self, keys: &[String]) -> CacheResult<usize> {
    let paths = keys
      .iter()
      .map(|k| Path::parse(k))
      .collect::<CacheResult<Vec<_>>>()?;
    let mut removed = 0;
    for path in &paths {
      removed += self.edit().remove_matching(path).len();
    }
    self.finish(Ok(removed))
  }

  pub fn increment(&mut self, key: &str, delta: f64) -> CacheResult<f64> {
    let path = Path::parse(key)?;
    let result = self.edit().add(&path, delta);
    self.finish(result)
  }

  pub fn decrement(&mut self, key: &str, delta: f64) -> CacheResult<f64> {
    self.increment(key, -delta)
  }

  pub fn append(&mut self, key: &str, value: impl Into<Value>) -> CacheResult<usize> {
    let path = Path::parse(key)?;
    let result = self.edit().append(&path, value.into());
    self.finish(result)
  }

  pub fn resize(&mut self, key: &str, size: usize) -> CacheResult<()> {
    let path = Path::parse(key)?;
    let result = self.edit().resize(&path, size);
    self.finish(result)
  }

  /// Apply every op against a scratch copy; commit only if all succeed.
  pub fn patch(&mut self, ops: &[PatchOp]) -> CacheResult<()> {
    self.commit_scratch(|edit| {
      for op in ops {
        op.apply(edit)?;
      }
      Ok(())
    })
  }

  /// Remove every key.
  pub fn flush(&mut self) -> CacheResult<usize> {
    let keys: Vec<String> = self.state.tree.keys().cloned().collect();
    for key in &keys {
      let path = Path::parse(key)?;
      self.edit().remove(&path);
    }
    self.finish(Ok(keys.len()))
  }

  /// Run commands in order; triggers are dispatched after each one.
  pub fn execute(&mut self, commands: &[Command]) -> CacheResult<Value> {
    let mut last = Value::Null;
    for command in commands {
      if let Err(e) = self.check_canceled() {
        return self.finish(Err(e));
      }
      last = match self.run(command, &[]) {
        Ok(value) => value,
        Err(e) => return self.finish(Err(e)),
      };
      if let Err(e) = self.cascade() {
        self.publish();
        return Err(e);
      }
    }
    self.finish(Ok(last))
  }

  // ==========================================================================
  // Triggers
  // ==========================================================================

  pub fn create_trigger(&mut self, key: &str, command: Command) -> CacheResult<String> {
    let id = Arc::make_mut(&mut self.state.triggers).create(key, command)?;
    tracing::debug!(cache = %self.cache.name, id = %id, key = %key, "Trigger created");
    self.publish();
    Ok(id)
  }

  pub fn replace_trigger(&mut self, id: &str, key: &str, command: Command) -> CacheResult<()> {
    Arc::make_mut(&mut self.state.triggers).replace(id, key, command)?;
    self.publish();
    Ok(())
  }

  pub fn delete_trigger(&mut self, id: &str) -> CacheResult<Trigger> {
    let removed = Arc::make_mut(&mut self.state.triggers).delete(id)?;
    self.publish();
    Ok(removed)
  }

  pub fn list_triggers(&self) -> Vec<Trigger> {
    self.state.triggers.list()
  }

  // ==========================================================================
  // Expiration
  // ==========================================================================

  /// Expire a live top-level key after `ttl`, replacing any earlier TTL.
  pub fn set_key_ttl(&mut self, key: &str, ttl: Duration) -> CacheResult<()> {
    let path = Path::parse(key)?;
    if !path.is_top_level() {
      return Err(CacheError::validation(format!(
        "ttl applies to top-level keys only, not {}",
        path
      )));
    }
    self.state.lookup(&path, Utc::now())?;
    let deadline = deadline_after(ttl)?;
    self.install_key_expiry(path.top(), deadline);
    self.publish();
    Ok(())
  }

  /// Drop the TTL of a key. Returns whether one was set.
  pub fn clear_key_ttl(&mut self, key: &str) -> CacheResult<bool> {
    let path = Path::parse(key)?;
    let had = self.forget_key_expiry(path.top());
    if had {
      self.publish();
    }
    Ok(had)
  }

  /// Set or clear the cache's own expiration.
  pub fn set_cache_ttl(&mut self, ttl: Option<Duration>) -> CacheResult<()> {
    if self.cache.protected {
      return Err(CacheError::validation(format!(
        "cache '{}' is protected and cannot expire",
        self.cache.name
      )));
    }
    let at = ttl.map(deadline_after).transpose()?;
    self.state.expiration = at;
    self.cache.schedule_cache_expiry(at);
    self.publish();
    Ok(())
  }

  fn install_key_expiry(&mut self, top: &str, deadline: DateTime<Utc>) {
    Arc::make_mut(&mut self.state.key_expirations).insert(top.to_string(), deadline);
    self.cache.schedule_key_expiry(top, deadline);
  }

  pub(super) fn forget_key_expiry(&mut self, top: &str) -> bool {
    self.cache.timers.lock().cancel(top);
    if self.state.key_expirations.contains_key(top) {
      Arc::make_mut(&mut self.state.key_expirations).remove(top);
      true
    } else {
      false
    }
  }

  /// Delete keys whose expiration passed, firing their triggers.
  fn purge_expired(&mut self) {
    let now = Utc::now();
    let due: Vec<String> = self
      .state
      .key_expirations
      .iter()
      .filter(|(_, at)| **at <= now)
      .map(|(k, _)| k.clone())
      .collect();
    if due.is_empty() {
      return;
    }
    for key in &due {
      self.forget_key_expiry(key);
      if let Ok(path) = Path::parse(key) {
        self.edit().remove(&path);
      }
    }
    tracing::debug!(cache = %self.cache.name, count = due.len(), "Purged expired keys");
    if let Err(e) = self.finish(Ok(())) {
      tracing::warn!(cache = %self.cache.name, error = %e, "Expiry cascade failed");
    }
  }

  fn expire_if_due(&mut self, key: &str, deadline: DateTime<Utc>) {
    if self.state.key_expirations.get(key) != Some(&deadline) {
      return;
    }
    self.cache.timers.lock().forget(key);
    Arc::make_mut(&mut self.state.key_expirations).remove(key);
    if let Ok(path) = Path::parse(key) {
      self.edit().remove(&path);
    }
    tracing::debug!(cache = %self.cache.name, key = %key, "Key expired");
    if let Err(e) = self.finish(Ok(())) {
      tracing::warn!(cache = %self.cache.name, error = %e, "Expiry cascade failed");
    }
  }

  // ==========================================================================
  // Snapshots
  // ==========================================================================

  pub fn snapshot(&self) -> Snapshot {
    Snapshot::capture(&self.state)
  }

  /// Replace the whole cache with a snapshot.
  ///
  /// Keys whose expiration already passed are dropped. A cache-level
  /// expiration in the past rejects the restore before anything changes;
  /// protected caches ignore cache-level expiration, past or not. Returns
  /// the number of keys installed.
  pub fn restore(&mut self, snapshot: Snapshot) -> CacheResult<usize> {
    let now = Utc::now();
    let expiration = if self.cache.protected {
      if snapshot.expiration.is_some() {
        tracing::warn!(cache = %self.cache.name, "Ignoring cache expiration for protected cache");
      }
      None
    } else {
      snapshot.live_expiration(now)?
    };
    let triggers = TriggerStore::from_buckets(snapshot.triggers)?;

    let mut data = snapshot.data;
    let mut expirations = BTreeMap::new();
    for (key, secs) in snapshot.key_expirations {
      if !data.contains_key(&key) {
        continue;
      }
      let at = timestamp(secs)?;
      if at <= now {
        tracing::warn!(cache = %self.cache.name, key = %key, "Dropping expired key from snapshot");
        data.remove(&key);
      } else {
        expirations.insert(key, at);
      }
    }

    self.cache.timers.lock().cancel_all();
    self.changes.clear();
    self.removed.clear();
    self.state.tree = Tree::from_map(data);
    self.state.triggers = Arc::new(triggers);
    self.state.key_expirations = Arc::new(BTreeMap::new());
    for (key, at) in expirations {
      self.install_key_expiry(&key, at);
    }

    self.state.expiration = expiration;
    self.cache.schedule_cache_expiry(expiration);
    self.publish();
    Ok(self.state.tree.len())
  }

  // ==========================================================================
  // Internals
  // ==========================================================================

  pub(super) fn edit(&mut self) -> Edit<'_> {
    Edit::new(&mut self.state.tree, &mut self.changes, &mut self.removed)
  }

  /// Run `apply` against a copy of the tree and install the copy only if it
  /// succeeds.
  fn commit_scratch<F>(&mut self, apply: F) -> CacheResult<()>
  where
    F: FnOnce(&mut Edit<'_>) -> CacheResult<()>,
  {
    let mut scratch = self.state.tree.clone();
    let mut changed = Vec::new();
    let mut removed = Vec::new();
    apply(&mut Edit::new(&mut scratch, &mut changed, &mut removed))?;
    self.state.tree = scratch;
    self.changes.extend(changed);
    self.removed.extend(removed);
    self.finish(Ok(()))
  }

  /// Drop the expiration of every top-level key removed since the last call,
  /// so a stale timer never fires against a key recreated later.
  pub(super) fn forget_removed(&mut self) {
    for top in std::mem::take(&mut self.removed) {
      self.forget_key_expiry(&top);
    }
  }

  /// Dispatch pending changes, publish, and combine errors. The operation's
  /// own error wins over a cascade error.
  pub(super) fn finish<T>(&mut self, result: CacheResult<T>) -> CacheResult<T> {
    self.forget_removed();
    let cascade = self.cascade();
    self.publish();
    let value = result?;
    cascade?;
    Ok(value)
  }

  pub(super) fn publish(&mut self) {
    *self.cache.published.write() = Arc::new(self.state.clone());
  }
}

impl Drop for WriteGuard<'_> {
  fn drop(&mut self) {
    *self.cache.owner.lock() = None;
    tracing::trace!(cache = %self.cache.name, owner = %self.owner, "Writer token released");
  }
}

fn parse_entries(entries: Vec<(String, Value)>) -> CacheResult<Vec<(Path, Value)>> {
  entries
    .into_iter()
    .map(|(k, v)| Ok((Path::parse(&k)?, v)))
    .collect()
}

/// Reject a TTL too far out to become a deadline.
pub fn check_ttl(ttl: Duration) -> CacheResult<()> {
  deadline_after(ttl).map(|_| ())
}

/// The instant `ttl` from now, if it is representable.
fn deadline_after(ttl: Duration) -> CacheResult<DateTime<Utc>> {
  chrono::Duration::from_std(ttl)
    .ok()
    .and_then(|d| Utc::now().checked_add_signed(d))
    .ok_or_else(|| CacheError::validation("ttl out of range"))
}

/// Mutations against one tree, recording every path whose value changed
/// and every top-level key removed.
pub(crate) struct Edit<'t> {
  tree: &'t mut Tree,
  changes: &'t mut Vec<Path>,
  removed: &'t mut Vec<String>,
}

impl<'t> Edit<'t> {
  pub fn new(tree: &'t mut Tree, changes: &'t mut Vec<Path>, removed: &'t mut Vec<String>) -> Self {
    Self {
      tree,
      changes,
      removed,
    }
  }

  pub fn tree(&self) -> &Tree {
    self.tree
  }

  /// Upsert. Writing an equal value records no change.
  pub fn write(&mut self, path: &Path, value: Value) -> CacheResult<()> {
    if self.tree.get(path) == Some(&value) {
      return Ok(());
    }
    self.tree.set(path, value)?;
    self.changes.push(path.clone());
    Ok(())
  }

  pub fn create(&mut self, path: &Path, value: Value) -> CacheResult<()> {
    self.tree.insert_new(path, value)?;
    self.changes.push(path.clone());
    Ok(())
  }

  /// Add `delta` to the number at `path`, returning the new value.
  pub fn add(&mut self, path: &Path, delta: f64) -> CacheResult<f64> {
    let current = match self.tree.get(path) {
      Some(Value::Number(n)) => *n,
      Some(other) => {
        return Err(CacheError::type_mismatch(format!(
          "{} is a {}, not a number",
          path,
          other.type_name()
        )))
      }
      None => return Err(CacheError::not_found(path)),
    };
    let next = current + delta;
    if !next.is_finite() {
      return Err(CacheError::Arithmetic(format!(
        "{} + {} is not a finite number",
        current, delta
      )));
    }
    self.write(path, Value::Number(next))?;
    Ok(next)
  }

  pub fn remove(&mut self, path: &Path) -> Option<Value> {
    let removed = self.tree.remove(path);
    if removed.is_some() {
      if path.is_top_level() {
        self.removed.push(path.top().to_string());
      }
      self.changes.push(path.clone());
    }
    removed
  }

  /// Remove a path, or every match of a wildcard pattern.
  pub fn remove_matching(&mut self, path: &Path) -> Vec<Value> {
    if !path.has_wildcard() {
      return self.remove(path).into_iter().collect();
    }
    // Later list indices first so earlier removals do not shift them.
    let mut targets = self.tree.glob(path);
    targets.reverse();
    targets.iter().filter_map(|p| self.remove(p)).collect()
  }

  pub fn append(&mut self, path: &Path, value: Value) -> CacheResult<usize> {
    let len = self.tree.append(path, value)?;
    self.changes.push(path.clone());
    Ok(len)
  }

  pub fn resize(&mut self, path: &Path, size: usize) -> CacheResult<()> {
    let before = match self.tree.get(path) {
      Some(Value::List(items)) => Some(items.len()),
      _ => None,
    };
    self.tree.resize(path, size)?;
    if before != Some(size) {
      self.changes.push(path.clone());
    }
    Ok(())
  }
}
