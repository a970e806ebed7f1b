//! Cache snapshot persistence
//!
//! A snapshot is one JSON document:
//!
//! ```json
//! {"data": {...}, "key_expirations": {"k": 1700000000},
//!  "triggers": {"k": [{"id": "...", "command": {...}}]}, "expiration": null}
//! ```
//!
//! Files are written to `<name>.tmp` in the target directory, synced and
//! renamed over the final name, so a crash never leaves a torn snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use super::error::{CacheError, CacheResult};
use super::store::CacheState;
use super::trigger::TriggerRecord;
use super::value::Value;

/// Serialized form of a cache's observable state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  #[serde(default)]
  pub data: BTreeMap<String, Value>,
  /// Top-level key to unix seconds.
  #[serde(default)]
  pub key_expirations: BTreeMap<String, i64>,
  #[serde(default)]
  pub triggers: BTreeMap<String, Vec<TriggerRecord>>,
  #[serde(default)]
  pub expiration: Option<i64>,
}

impl Snapshot {
  pub(crate) fn capture(state: &CacheState) -> Self {
    Self {
      data: state.tree.to_map(),
      key_expirations: state
        .key_expirations
        .iter()
        .map(|(k, at)| (k.clone(), at.timestamp()))
        .collect(),
      triggers: state.triggers.to_buckets(),
      expiration: state.expiration.map(|at| at.timestamp()),
    }
  }

  /// Cache-level expiration, rejected when it already passed.
  pub fn live_expiration(&self, now: DateTime<Utc>) -> CacheResult<Option<DateTime<Utc>>> {
    let Some(ts) = self.expiration else {
      return Ok(None);
    };
    let at = timestamp(ts)?;
    if at <= now {
      return Err(CacheError::validation(format!(
        "snapshot cache expiration {} is in the past",
        at.to_rfc3339()
      )));
    }
    Ok(Some(at))
  }
}

pub(crate) fn timestamp(secs: i64) -> CacheResult<DateTime<Utc>> {
  DateTime::from_timestamp(secs, 0)
    .ok_or_else(|| CacheError::validation(format!("invalid timestamp {}", secs)))
}

/// Reads and writes snapshot files under one base directory.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
  dir: PathBuf,
}

impl SnapshotManager {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Resolve a client-supplied filename. Only relative paths without `..`
  /// are accepted.
  pub fn resolve(&self, filename: &str) -> CacheResult<PathBuf> {
    if filename.trim().is_empty() {
      return Err(CacheError::validation("filename must not be empty"));
    }
    let rel = Path::new(filename);
    for component in rel.components() {
      match component {
        Component::Normal(_) | Component::CurDir => {}
        _ => {
          return Err(CacheError::validation(format!(
            "invalid snapshot filename '{}'",
            filename
          )))
        }
      }
    }
    Ok(self.dir.join(rel))
  }

  pub async fn save(&self, filename: &str, snapshot: &Snapshot) -> CacheResult<PathBuf> {
    let path = self.resolve(filename)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_vec_pretty(snapshot)?;
    let temp_path = temp_path(&path);
    let mut file = File::create(&temp_path).await?;
    file.write_all(&json).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, &path).await?;

    tracing::info!(
      "Cache snapshot saved: {} keys to {}",
      snapshot.data.len(),
      path.display()
    );
    Ok(path)
  }

  pub async fn load(&self, filename: &str) -> CacheResult<Snapshot> {
    let path = self.resolve(filename)?;
    let bytes = fs::read(&path).await.map_err(|e| missing(&path, e))?;
    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
    tracing::info!(
      "Cache snapshot loaded: {} keys from {}",
      snapshot.data.len(),
      path.display()
    );
    Ok(snapshot)
  }

  /// Same as `save`, for callers already holding the writer token inside
  /// synchronous command execution.
  pub fn save_blocking(&self, filename: &str, snapshot: &Snapshot) -> CacheResult<PathBuf> {
    use std::io::Write;

    let path = self.resolve(filename)?;
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(snapshot)?;
    let temp_path = temp_path(&path);
    let mut file = std::fs::File::create(&temp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&temp_path, &path)?;

    tracing::info!(
      "Cache snapshot saved: {} keys to {}",
      snapshot.data.len(),
      path.display()
    );
    Ok(path)
  }

  pub fn load_blocking(&self, filename: &str) -> CacheResult<Snapshot> {
    let path = self.resolve(filename)?;
    let bytes = std::fs::read(&path).map_err(|e| missing(&path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
  }
}

fn temp_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}

fn missing(path: &Path, e: std::io::Error) -> CacheError {
  if e.kind() == std::io::ErrorKind::NotFound {
    CacheError::not_found(format!("snapshot {}", path.display()))
  } else {
    e.into()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_resolve_rejects_escapes() {
    let manager = SnapshotManager::new("/tmp/snaps");
    assert!(manager.resolve("a.json").is_ok());
    assert!(manager.resolve("nested/a.json").is_ok());
    for bad in ["", "../a.json", "a/../../b", "/etc/passwd"] {
      assert!(
        matches!(manager.resolve(bad), Err(CacheError::Validation(_))),
        "{} accepted",
        bad
      );
    }
  }

  #[tokio::test]
  async fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SnapshotManager::new(dir.path());
    let snapshot: Snapshot = serde_json::from_value(json!({
      "data": {"a": 1, "b": {"c": "x"}},
      "key_expirations": {"a": 4102444800i64},
      "triggers": {},
      "expiration": null
    }))
    .unwrap();

    let path = manager.save("snap.json", &snapshot).await.unwrap();
    assert!(path.exists());
    assert!(!dir.path().join("snap.json.tmp").exists());
    assert_eq!(manager.load("snap.json").await.unwrap(), snapshot);
    assert_eq!(manager.load_blocking("snap.json").unwrap(), snapshot);
  }

  #[tokio::test]
  async fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SnapshotManager::new(dir.path());
    assert!(matches!(
      manager.load("nope.json").await,
      Err(CacheError::NotFound(_))
    ));
  }

  #[test]
  fn test_past_cache_expiration_rejected() {
    let snapshot = Snapshot {
      expiration: Some(1),
      ..Default::default()
    };
    assert!(matches!(
      snapshot.live_expiration(Utc::now()),
      Err(CacheError::Validation(_))
    ));
    let empty = Snapshot::default();
    assert_eq!(empty.live_expiration(Utc::now()).unwrap(), None);
  }

  #[test]
  fn test_missing_sections_default() {
    let snapshot: Snapshot = serde_json::from_str(r#"{"data": {"k": true}}"#).unwrap();
    assert!(snapshot.triggers.is_empty());
    assert_eq!(snapshot.expiration, None);
  }
}
