//! Path resolution over the top-level key map
//!
//! Each top-level value sits behind an `Arc` so a writer's draft shares every
//! untouched key with the published copy. Mutating a key clones only that
//! key's value (`Arc::make_mut`).

use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::{CacheError, CacheResult};
use super::path::{Path, WILDCARD};
use super::value::{parse_index, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tree {
  entries: BTreeMap<String, Arc<Value>>,
}

fn unshare(v: Arc<Value>) -> Value {
  Arc::try_unwrap(v).unwrap_or_else(|shared| (*shared).clone())
}

impl Tree {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_map(map: BTreeMap<String, Value>) -> Self {
    Self {
      entries: map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
    }
  }

  pub fn to_map(&self) -> BTreeMap<String, Value> {
    self
      .entries
      .iter()
      .map(|(k, v)| (k.clone(), (**v).clone()))
      .collect()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Top-level keys in sorted order.
  pub fn keys(&self) -> impl Iterator<Item = &String> {
    self.entries.keys()
  }

  pub fn get(&self, path: &Path) -> Option<&Value> {
    let segments = path.segments();
    let mut node: &Value = self.entries.get(&segments[0])?;
    for segment in &segments[1..] {
      node = node.child(segment)?;
    }
    Some(node)
  }

  pub fn contains(&self, path: &Path) -> bool {
    self.get(path).is_some()
  }

  /// Read a path, failing with NotFound at the first missing segment.
  pub fn lookup(&self, path: &Path) -> CacheResult<&Value> {
    self.get(path).ok_or_else(|| CacheError::not_found(path))
  }

  pub fn get_mut(&mut self, path: &Path) -> Option<&mut Value> {
    if !self.contains(path) {
      return None;
    }
    let segments = path.segments();
    let mut node = Arc::make_mut(self.entries.get_mut(&segments[0])?);
    for segment in &segments[1..] {
      node = node.child_mut(segment)?;
    }
    Some(node)
  }

  /// Write `value` at `path`, creating missing intermediate mappings.
  ///
  /// Returns the previous value, if any. An existing scalar on the way down
  /// is never turned into a mapping.
  pub fn set(&mut self, path: &Path, value: Value) -> CacheResult<Option<Value>> {
    let segments = path.segments();
    if segments.len() == 1 {
      return Ok(
        self
          .entries
          .insert(segments[0].clone(), Arc::new(value))
          .map(unshare),
      );
    }
    let root = self
      .entries
      .entry(segments[0].clone())
      .or_insert_with(|| Arc::new(Value::Map(BTreeMap::new())));
    set_in(Arc::make_mut(root), &segments[1..], value, path)
  }

  /// Insert a value that must not exist yet.
  pub fn insert_new(&mut self, path: &Path, value: Value) -> CacheResult<()> {
    if self.contains(path) {
      return Err(CacheError::KeyAlreadyExists(path.to_string()));
    }
    self.set(path, value)?;
    Ok(())
  }

  /// Remove a path, shifting list successors left. Missing paths yield None.
  pub fn remove(&mut self, path: &Path) -> Option<Value> {
    let segments = path.segments();
    if segments.len() == 1 {
      return self.entries.remove(&segments[0]).map(unshare);
    }
    if !self.contains(path) {
      return None;
    }
    let root = Arc::make_mut(self.entries.get_mut(&segments[0])?);
    remove_in(root, &segments[1..])
  }

  /// Every concrete path matching a pattern whose segments may be `*`.
  ///
  /// Map children come out in key order, list children in index order.
  pub fn glob(&self, pattern: &Path) -> Vec<Path> {
    let segments = pattern.segments();
    let mut out = Vec::new();
    if segments[0] == WILDCARD {
      for (key, value) in &self.entries {
        glob_in(value, &segments[1..], vec![key.clone()], &mut out);
      }
    } else if let Some(value) = self.entries.get(&segments[0]) {
      glob_in(value, &segments[1..], vec![segments[0].clone()], &mut out);
    }
    out
  }

  /// Append to the list at `path`.
  pub fn append(&mut self, path: &Path, value: Value) -> CacheResult<usize> {
    match self.get_mut(path) {
      Some(Value::List(items)) => {
        items.push(value);
        Ok(items.len())
      }
      Some(other) => Err(CacheError::type_mismatch(format!(
        "{} is a {}, not a list",
        path,
        other.type_name()
      ))),
      None => Err(CacheError::not_found(path)),
    }
  }

  /// Truncate or null-pad the list at `path`.
  pub fn resize(&mut self, path: &Path, size: usize) -> CacheResult<()> {
    match self.get_mut(path) {
      Some(Value::List(items)) => {
        items.resize(size, Value::Null);
        Ok(())
      }
      Some(other) => Err(CacheError::type_mismatch(format!(
        "{} is a {}, not a list",
        path,
        other.type_name()
      ))),
      None => Err(CacheError::not_found(path)),
    }
  }

  pub fn approximate_size(&self) -> usize {
    self
      .entries
      .iter()
      .map(|(k, v)| k.len() + v.approximate_size())
      .sum()
  }
}

fn set_in(
  node: &mut Value,
  rest: &[String],
  value: Value,
  full: &Path,
) -> CacheResult<Option<Value>> {
  let (head, tail) = match rest.split_first() {
    Some(split) => split,
    None => return Ok(Some(std::mem::replace(node, value))),
  };
  match node {
    Value::Map(map) => {
      if tail.is_empty() {
        return Ok(map.insert(head.clone(), value));
      }
      let next = map
        .entry(head.clone())
        .or_insert_with(|| Value::Map(BTreeMap::new()));
      set_in(next, tail, value, full)
    }
    Value::List(items) => {
      let idx = parse_index(head).ok_or_else(|| {
        CacheError::type_mismatch(format!("{}: '{}' is not a list index", full, head))
      })?;
      if idx == items.len() && tail.is_empty() {
        items.push(value);
        return Ok(None);
      }
      match items.get_mut(idx) {
        Some(slot) if tail.is_empty() => Ok(Some(std::mem::replace(slot, value))),
        Some(slot) => set_in(slot, tail, value, full),
        None => Err(CacheError::not_found(format!(
          "{}: index {} out of range",
          full, idx
        ))),
      }
    }
    other => Err(CacheError::type_mismatch(format!(
      "cannot write {}: '{}' holds a {}",
      full,
      head,
      other.type_name()
    ))),
  }
}

fn remove_in(node: &mut Value, rest: &[String]) -> Option<Value> {
  let (head, tail) = rest.split_first()?;
  if !tail.is_empty() {
    return remove_in(node.child_mut(head)?, tail);
  }
  match node {
    Value::Map(map) => map.remove(head),
    Value::List(items) => {
      let idx = parse_index(head)?;
      (idx < items.len()).then(|| items.remove(idx))
    }
    _ => None,
  }
}

fn glob_in(node: &Value, rest: &[String], prefix: Vec<String>, out: &mut Vec<Path>) {
  let (head, tail) = match rest.split_first() {
    Some(split) => split,
    None => {
      if let Ok(path) = Path::from_segments(prefix) {
        out.push(path);
      }
      return;
    }
  };
  if head == WILDCARD {
    match node {
      Value::Map(map) => {
        for (key, child) in map {
          let mut next = prefix.clone();
          next.push(key.clone());
          glob_in(child, tail, next, out);
        }
      }
      Value::List(items) => {
        for (i, child) in items.iter().enumerate() {
          let mut next = prefix.clone();
          next.push(i.to_string());
          glob_in(child, tail, next, out);
        }
      }
      _ => {}
    }
  } else if let Some(child) = node.child(head) {
    let mut next = prefix;
    next.push(head.clone());
    glob_in(child, tail, next, out);
  }
}
