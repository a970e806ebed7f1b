//! Trigger registrations and pattern matching

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::command::Command;
use super::error::{CacheError, CacheResult};
use super::path::Path;

/// A command run whenever a path matching `key` changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
  pub id: String,
  pub key: String,
  pub command: Command,
}

/// A trigger as it appears inside a snapshot bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
  pub id: String,
  pub command: Command,
}

#[derive(Debug, Clone)]
struct Registered {
  trigger: Trigger,
  pattern: Path,
}

/// Triggers in registration order. Firing order follows this order.
#[derive(Debug, Clone, Default)]
pub struct TriggerStore {
  entries: Vec<Registered>,
}

impl TriggerStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn create(&mut self, key: &str, command: Command) -> CacheResult<String> {
    let id = Uuid::new_v4().to_string();
    self.insert(Trigger {
      id: id.clone(),
      key: key.to_string(),
      command,
    })?;
    Ok(id)
  }

  /// Register a trigger that already has an id (restore path).
  pub fn insert(&mut self, trigger: Trigger) -> CacheResult<()> {
    if self.entries.iter().any(|r| r.trigger.id == trigger.id) {
      return Err(CacheError::KeyAlreadyExists(format!("trigger {}", trigger.id)));
    }
    let pattern = Path::parse(&trigger.key)?;
    self.entries.push(Registered {
      trigger: Trigger {
        key: pattern.to_string(),
        ..trigger
      },
      pattern,
    });
    Ok(())
  }

  /// Replace key and command of an existing trigger, keeping its position.
  pub fn replace(&mut self, id: &str, key: &str, command: Command) -> CacheResult<()> {
    let pattern = Path::parse(key)?;
    let slot = self
      .entries
      .iter_mut()
      .find(|r| r.trigger.id == id)
      .ok_or_else(|| CacheError::not_found(format!("trigger {}", id)))?;
    slot.trigger.key = pattern.to_string();
    slot.trigger.command = command;
    slot.pattern = pattern;
    Ok(())
  }

  pub fn delete(&mut self, id: &str) -> CacheResult<Trigger> {
    let idx = self
      .entries
      .iter()
      .position(|r| r.trigger.id == id)
      .ok_or_else(|| CacheError::not_found(format!("trigger {}", id)))?;
    Ok(self.entries.remove(idx).trigger)
  }

  pub fn get(&self, id: &str) -> Option<&Trigger> {
    self
      .entries
      .iter()
      .find(|r| r.trigger.id == id)
      .map(|r| &r.trigger)
  }

  pub fn list(&self) -> Vec<Trigger> {
    self.entries.iter().map(|r| r.trigger.clone()).collect()
  }

  /// Triggers whose pattern matches `path`, with their captures.
  pub fn matching(&self, path: &Path) -> Vec<(Trigger, Vec<String>)> {
    self
      .entries
      .iter()
      .filter_map(|r| {
        r.pattern
          .captures(path)
          .map(|captures| (r.trigger.clone(), captures))
      })
      .collect()
  }

  /// Group by watched key, the shape stored in snapshots.
  pub fn to_buckets(&self) -> BTreeMap<String, Vec<TriggerRecord>> {
    let mut buckets: BTreeMap<String, Vec<TriggerRecord>> = BTreeMap::new();
    for r in &self.entries {
      buckets
        .entry(r.trigger.key.clone())
        .or_default()
        .push(TriggerRecord {
          id: r.trigger.id.clone(),
          command: r.trigger.command.clone(),
        });
    }
    buckets
  }

  pub fn from_buckets(buckets: BTreeMap<String, Vec<TriggerRecord>>) -> CacheResult<Self> {
    let mut store = TriggerStore::new();
    for (key, records) in buckets {
      for record in records {
        store.insert(Trigger {
          id: record.id,
          key: key.clone(),
          command: record.command,
        })?;
      }
    }
    Ok(store)
  }
}
