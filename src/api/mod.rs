//! HTTP/JSON API
//!
//! Routes live under `/api/v1`; snapshot operations under `/admin` sit
//! behind the bearer-token hook. Requests address a cache through the
//! `X-Cache-Name` header and fall back to the default cache.

mod admin;
mod caches;
mod error;
mod keys;
mod triggers;

use axum::{
  extract::{FromRequestParts, Request, State},
  http::{header, request::Parts, StatusCode},
  middleware::Next,
  response::{IntoResponse, Response},
  routing::{get, post, put},
  Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use error::AppError;

use crate::cache::{Cache, Registry};
use crate::server::ServerConfig;

pub const CACHE_HEADER: &str = "x-cache-name";

static OPENAPI: &str = include_str!("openapi.yaml");

/// Shared application state
#[derive(Clone)]
pub struct AppState {
  pub registry: Arc<Registry>,
  pub config: ServerConfig,
}

impl AppState {
  pub fn new(registry: Arc<Registry>, config: ServerConfig) -> Self {
    Self { registry, config }
  }
}

/// The cache named by `X-Cache-Name`, or the default cache.
pub struct SelectedCache(pub Arc<Cache>);

impl FromRequestParts<AppState> for SelectedCache {
  type Rejection = AppError;

  async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
    let cache = match parts.headers.get(CACHE_HEADER) {
      Some(value) => {
        let name = value
          .to_str()
          .map_err(|_| AppError::BadRequest("invalid X-Cache-Name header".into()))?;
        state.registry.fetch_cache(name)?
      }
      None => state.registry.default_cache()?,
    };
    Ok(Self(cache))
  }
}

/// Writer-token owner tag for an HTTP request.
fn owner(op: &str) -> String {
  format!("http-{}", op)
}

pub fn router(state: AppState) -> Router {
  let api = Router::new()
    .route("/api/v1/openapi.yaml", get(serve_openapi))
    .route(
      "/api/v1/caches",
      get(caches::list_caches).post(caches::create_cache),
    )
    .route("/api/v1/caches/stats", get(caches::cache_stats))
    .route(
      "/api/v1/caches/{name}",
      put(caches::update_cache).delete(caches::delete_cache),
    )
    .route(
      "/api/v1/keys",
      post(keys::create_keys)
        .put(keys::replace_keys)
        .patch(keys::patch_keys),
    )
    .route("/api/v1/keys/get", post(keys::get_keys))
    .route("/api/v1/keys/delete", post(keys::delete_keys))
    .route(
      "/api/v1/keys/{*key}",
      get(keys::get_key)
        .put(keys::put_key)
        .delete(keys::delete_key),
    )
    .route("/api/v1/commands/execute", post(triggers::execute_commands))
    .route(
      "/api/v1/triggers",
      get(triggers::list_triggers).post(triggers::create_trigger),
    )
    .route(
      "/api/v1/triggers/{id}",
      put(triggers::replace_trigger).delete(triggers::delete_trigger),
    );

  let admin_routes = Router::new()
    .route("/admin/backup", post(admin::backup))
    .route("/admin/restore", post(admin::restore))
    .layer(axum::middleware::from_fn_with_state(
      state.clone(),
      admin_auth_middleware,
    ));

  let cors = if state.config.server.cors_origins.is_empty()
    || state.config.server.cors_origins.iter().any(|o| o == "*")
  {
    CorsLayer::permissive()
  } else {
    let origins: Vec<_> = state
      .config
      .server
      .cors_origins
      .iter()
      .filter_map(|o| o.parse().ok())
      .collect();
    CorsLayer::new()
      .allow_origin(origins)
      .allow_methods(Any)
      .allow_headers(Any)
  };

  Router::new()
    .route("/healthz", get(health_check))
    .merge(api)
    .merge(admin_routes)
    .layer(cors)
    .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
  Json(serde_json::json!({ "status": "ok" }))
}

async fn serve_openapi() -> impl IntoResponse {
  ([(header::CONTENT_TYPE, "application/yaml")], OPENAPI)
}

/// Bearer token check for admin routes. Passes everything through when auth
/// is disabled.
async fn admin_auth_middleware(
  State(state): State<AppState>,
  req: Request,
  next: Next,
) -> Response {
  if !state.config.auth.enabled {
    return next.run(req).await;
  }

  let token = req
    .headers()
    .get(header::AUTHORIZATION)
    .and_then(|h| h.to_str().ok())
    .and_then(|h| h.strip_prefix("Bearer "))
    .map(str::to_string);

  match token {
    Some(t) => match state.config.auth.admin_token.as_deref() {
      Some(expected) if !expected.is_empty() && t == expected => next.run(req).await,
      _ => (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "Invalid token"})),
      )
        .into_response(),
    },
    None => (
      StatusCode::UNAUTHORIZED,
      Json(serde_json::json!({"error": "Authentication required"})),
    )
      .into_response(),
  }
}

/// HTTP API server
pub struct ApiServer {
  listener: TcpListener,
  state: AppState,
  shutdown_rx: broadcast::Receiver<()>,
}

impl ApiServer {
  /// Serve on an already bound listener.
  pub fn new(listener: TcpListener, state: AppState, shutdown_rx: broadcast::Receiver<()>) -> Self {
    Self {
      listener,
      state,
      shutdown_rx,
    }
  }

  pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
    self.listener.local_addr()
  }

  pub async fn run(mut self) -> Result<(), anyhow::Error> {
    tracing::info!("HTTP API listening on {}", self.listener.local_addr()?);
    let app = router(self.state);

    axum::serve(self.listener, app.into_make_service())
      .with_graceful_shutdown(async move {
        let _ = self.shutdown_rx.recv().await;
        tracing::info!("HTTP API shutting down");
      })
      .await?;
    Ok(())
  }
}
