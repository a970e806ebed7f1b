//! Key handlers

use axum::{extract::Path, http::StatusCode, Json};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{owner, AppError, SelectedCache};
use crate::cache::{self, CacheError, PatchOp, Value};

#[derive(Deserialize)]
pub(super) struct CreateKeysRequest {
  entries: BTreeMap<String, Value>,
  /// Milliseconds per top-level key.
  #[serde(default)]
  ttl: BTreeMap<String, u64>,
}

#[derive(Deserialize)]
pub(super) struct ReplaceKeysRequest {
  entries: BTreeMap<String, Value>,
  /// Milliseconds per top-level key; null cancels.
  #[serde(default)]
  ttl: BTreeMap<String, Option<u64>>,
}

#[derive(Deserialize)]
pub(super) struct PutKeyRequest {
  value: Value,
  #[serde(default)]
  ttl: Option<u64>,
}

#[derive(Deserialize)]
pub(super) struct KeysRequest {
  keys: Vec<String>,
}

#[derive(Deserialize)]
pub(super) struct PatchRequest {
  operations: Vec<PatchOp>,
}

fn require_keys(keys: &[String]) -> Result<(), AppError> {
  if keys.is_empty() {
    return Err(AppError::BadRequest("at least one key is required".into()));
  }
  if keys.iter().any(|k| k.is_empty()) {
    return Err(AppError::BadRequest("key cannot be empty".into()));
  }
  Ok(())
}

/// TTLs may only name top-level keys that are part of the same request.
fn check_ttl_keys<'a>(
  entries: &BTreeMap<String, Value>,
  ttls: impl Iterator<Item = (&'a String, Option<u64>)>,
) -> Result<(), AppError> {
  for (key, ms) in ttls {
    if !entries.contains_key(key) {
      return Err(AppError::BadRequest(format!(
        "ttl given for {} which is not in entries",
        key
      )));
    }
    check_ttl_key(key, ms)?;
  }
  Ok(())
}

/// A TTL must target a top-level key and be small enough to schedule.
fn check_ttl_key(key: &str, ms: Option<u64>) -> Result<(), AppError> {
  if !cache::Path::parse(key)?.is_top_level() {
    return Err(CacheError::validation(format!("ttl applies to top-level keys only, not {}", key)).into());
  }
  if let Some(ms) = ms {
    cache::check_ttl(Duration::from_millis(ms))?;
  }
  Ok(())
}

pub(super) async fn create_keys(
  SelectedCache(cache): SelectedCache,
  Json(req): Json<CreateKeysRequest>,
) -> Result<StatusCode, AppError> {
  if req.entries.is_empty() {
    return Err(AppError::BadRequest("at least one entry is required".into()));
  }
  check_ttl_keys(&req.entries, req.ttl.iter().map(|(k, ms)| (k, Some(*ms))))?;

  let mut guard = cache.acquire(owner("create")).await;
  guard.create_batch(req.entries.into_iter().collect())?;
  for (key, ms) in &req.ttl {
    guard.set_key_ttl(key, Duration::from_millis(*ms))?;
  }
  Ok(StatusCode::CREATED)
}

pub(super) async fn replace_keys(
  SelectedCache(cache): SelectedCache,
  Json(req): Json<ReplaceKeysRequest>,
) -> Result<StatusCode, AppError> {
  if req.entries.is_empty() {
    return Err(AppError::BadRequest("at least one entry is required".into()));
  }
  check_ttl_keys(&req.entries, req.ttl.iter().map(|(k, ms)| (k, *ms)))?;

  let mut guard = cache.acquire(owner("replace")).await;
  guard.replace_batch(req.entries.into_iter().collect())?;
  for (key, ttl) in &req.ttl {
    let result = match ttl {
      Some(ms) => guard.set_key_ttl(key, Duration::from_millis(*ms)),
      None => guard.clear_key_ttl(key).map(|_| ()),
    };
    if let Err(e) = result {
      tracing::warn!(cache = %cache.name(), key = %key, "Could not update key TTL: {}", e);
    }
  }
  Ok(StatusCode::OK)
}

pub(super) async fn patch_keys(
  SelectedCache(cache): SelectedCache,
  Json(req): Json<PatchRequest>,
) -> Result<StatusCode, AppError> {
  let mut guard = cache.acquire(owner("patch")).await;
  guard.patch(&req.operations)?;
  Ok(StatusCode::OK)
}

pub(super) async fn get_key(
  SelectedCache(cache): SelectedCache,
  Path(key): Path<String>,
) -> Result<Json<Value>, AppError> {
  Ok(Json(cache.get(&key)?))
}

/// Values in request order; missing keys read as null.
pub(super) async fn get_keys(
  SelectedCache(cache): SelectedCache,
  Json(req): Json<KeysRequest>,
) -> Result<Json<Vec<Value>>, AppError> {
  require_keys(&req.keys)?;
  let values = cache
    .batch_get(&req.keys)
    .into_iter()
    .map(|result| match result {
      Err(CacheError::NotFound(_)) => Ok(Value::Null),
      other => other,
    })
    .collect::<Result<Vec<_>, _>>()?;
  Ok(Json(values))
}

pub(super) async fn put_key(
  SelectedCache(cache): SelectedCache,
  Path(key): Path<String>,
  Json(req): Json<PutKeyRequest>,
) -> Result<StatusCode, AppError> {
  if req.ttl.is_some() {
    check_ttl_key(&key, req.ttl)?;
  }
  let mut guard = cache.acquire(owner("put")).await;
  guard.replace(&key, req.value)?;
  if let Some(ms) = req.ttl {
    guard.set_key_ttl(&key, Duration::from_millis(ms))?;
  }
  Ok(StatusCode::OK)
}

pub(super) async fn delete_key(
  SelectedCache(cache): SelectedCache,
  Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
  let mut guard = cache.acquire(owner("delete")).await;
  guard.delete(&[key])?;
  Ok(StatusCode::OK)
}

pub(super) async fn delete_keys(
  SelectedCache(cache): SelectedCache,
  Json(req): Json<KeysRequest>,
) -> Result<StatusCode, AppError> {
  require_keys(&req.keys)?;
  let mut guard = cache.acquire(owner("delete")).await;
  guard.delete(&req.keys)?;
  Ok(StatusCode::OK)
}
