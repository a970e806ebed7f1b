//! Snapshot endpoints

use axum::{extract::State, Json};
use serde::Deserialize;

use super::{AppError, AppState};

#[derive(Deserialize)]
pub(super) struct SnapshotRequest {
  /// Target cache; the default cache when absent.
  #[serde(default)]
  cache: Option<String>,
  filename: String,
}

pub(super) async fn backup(
  State(state): State<AppState>,
  Json(req): Json<SnapshotRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
  let path = state
    .registry
    .backup(req.cache.as_deref(), &req.filename)
    .await?;
  tracing::info!("Backup written to {}", path.display());
  Ok(Json(serde_json::json!({ "path": path.display().to_string() })))
}

pub(super) async fn restore(
  State(state): State<AppState>,
  Json(req): Json<SnapshotRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
  let keys = state
    .registry
    .restore(req.cache.as_deref(), &req.filename)
    .await?;
  Ok(Json(serde_json::json!({ "keys": keys })))
}
