//! Command execution and trigger handlers

use axum::{extract::Path, http::StatusCode, Json};
use serde::Deserialize;

use super::{owner, AppError, SelectedCache};
use crate::cache::Command;

#[derive(Deserialize)]
pub(super) struct ExecuteRequest {
  commands: Vec<Command>,
}

#[derive(Deserialize)]
pub(super) struct TriggerRequest {
  key: String,
  command: Command,
}

pub(super) async fn execute_commands(
  SelectedCache(cache): SelectedCache,
  Json(req): Json<ExecuteRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
  let mut guard = cache.acquire(owner("execute")).await;
  let result = guard.execute(&req.commands)?;
  Ok(Json(serde_json::json!({ "result": result })))
}

pub(super) async fn list_triggers(SelectedCache(cache): SelectedCache) -> Json<serde_json::Value> {
  Json(serde_json::json!({ "triggers": cache.triggers() }))
}

pub(super) async fn create_trigger(
  SelectedCache(cache): SelectedCache,
  Json(req): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
  if req.key.is_empty() {
    return Err(AppError::BadRequest("trigger key is required".into()));
  }
  let mut guard = cache.acquire(owner("trigger")).await;
  let id = guard.create_trigger(&req.key, req.command)?;
  tracing::debug!(cache = %cache.name(), trigger = %id, key = %req.key, "Trigger created");
  Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

pub(super) async fn replace_trigger(
  SelectedCache(cache): SelectedCache,
  Path(id): Path<String>,
  Json(req): Json<TriggerRequest>,
) -> Result<StatusCode, AppError> {
  let mut guard = cache.acquire(owner("trigger")).await;
  guard.replace_trigger(&id, &req.key, req.command)?;
  Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn delete_trigger(
  SelectedCache(cache): SelectedCache,
  Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
  let mut guard = cache.acquire(owner("trigger")).await;
  guard.delete_trigger(&id)?;
  Ok(StatusCode::OK)
}
