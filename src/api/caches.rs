//! Cache management handlers

use axum::{
  extract::{Path, State},
  http::StatusCode,
  Json,
};
use serde::Deserialize;
use std::time::Duration;

use super::{AppError, AppState};

#[derive(Deserialize)]
pub(super) struct CreateCacheRequest {
  name: String,
  /// Milliseconds until the cache is destroyed.
  #[serde(default, alias = "expiration")]
  ttl: Option<u64>,
}

#[derive(Deserialize)]
pub(super) struct UpdateCacheRequest {
  /// Milliseconds; null cancels the expiration.
  ttl: Option<u64>,
}

pub(super) async fn list_caches(State(state): State<AppState>) -> Json<Vec<String>> {
  Json(state.registry.list())
}

pub(super) async fn create_cache(
  State(state): State<AppState>,
  Json(req): Json<CreateCacheRequest>,
) -> Result<StatusCode, AppError> {
  if req.name.is_empty() {
    return Err(AppError::BadRequest("cache name is required".into()));
  }
  state.registry.add_cache(&req.name)?;
  if let Some(ms) = req.ttl {
    if let Err(e) = state
      .registry
      .set_cache_ttl(&req.name, Duration::from_millis(ms))
      .await
    {
      tracing::error!(cache = %req.name, "Could not set cache expiration: {}", e);
    }
  }
  Ok(StatusCode::CREATED)
}

pub(super) async fn update_cache(
  State(state): State<AppState>,
  Path(name): Path<String>,
  Json(req): Json<UpdateCacheRequest>,
) -> Result<StatusCode, AppError> {
  if name == state.registry.default_name() {
    return Err(AppError::BadRequest(format!(
      "cache '{}' cannot be modified",
      name
    )));
  }
  match req.ttl {
    Some(ms) => {
      state
        .registry
        .set_cache_ttl(&name, Duration::from_millis(ms))
        .await?
    }
    None => state.registry.cancel_cache_expiration(&name).await?,
  }
  Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn delete_cache(
  State(state): State<AppState>,
  Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
  state.registry.delete_cache(&name)?;
  Ok(StatusCode::OK)
}

pub(super) async fn cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
  Json(serde_json::json!({ "caches": state.registry.stats() }))
}
