//! HTTP API tests against the router, without a socket

use axum::{
  body::Body,
  http::{header, Method, Request, StatusCode},
  Router,
};
use http_body_util::BodyExt;
use mapcache::api::{router, AppState, CACHE_HEADER};
use mapcache::cache::{CacheSettings, Registry, Value};
use mapcache::server::ServerConfig;
use serde_json::{json, Value as Json};
use std::sync::Arc;
use tower::ServiceExt;

fn setup() -> (Arc<Registry>, Router) {
  let registry = Registry::new(CacheSettings::default());
  let app = router(AppState::new(registry.clone(), ServerConfig::default()));
  (registry, app)
}

async fn send(
  app: &Router,
  method: Method,
  uri: &str,
  body: Option<Json>,
  headers: &[(&str, &str)],
) -> (StatusCode, Json) {
  let mut builder = Request::builder().method(method).uri(uri);
  for (name, value) in headers {
    builder = builder.header(*name, *value);
  }
  let body = match body {
    Some(json) => {
      builder = builder.header(header::CONTENT_TYPE, "application/json");
      Body::from(json.to_string())
    }
    None => Body::empty(),
  };

  let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
  let status = response.status();
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  let json = if bytes.is_empty() {
    Json::Null
  } else {
    serde_json::from_slice(&bytes).unwrap_or_else(|_| Json::String(String::from_utf8_lossy(&bytes).into()))
  };
  (status, json)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
  send(app, method, uri, body, &[]).await
}

// =============================================================================
// Health and docs
// =============================================================================

#[tokio::test]
async fn test_healthz() {
  let (_, app) = setup();
  let (status, body) = call(&app, Method::GET, "/healthz", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_openapi_document_is_served() {
  let (_, app) = setup();
  let (status, body) = call(&app, Method::GET, "/api/v1/openapi.yaml", None).await;
  assert_eq!(status, StatusCode::OK);
  assert!(body.as_str().unwrap().contains("openapi:"));
}

// =============================================================================
// Keys
// =============================================================================

#[tokio::test]
async fn test_create_and_read_keys() {
  let (_, app) = setup();
  let (status, _) = call(
    &app,
    Method::POST,
    "/api/v1/keys",
    Some(json!({"entries": {"user/1": {"name": "ann", "age": 30}, "plain": "x"}})),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);

  let (status, body) = call(&app, Method::GET, "/api/v1/keys/user/1/name", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!("ann"));

  let (status, body) = call(&app, Method::GET, "/api/v1/keys/user/1", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"name": "ann", "age": 30}));

  let (status, body) = call(&app, Method::GET, "/api/v1/keys/missing", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body["error"].is_string());

  let (status, body) = call(
    &app,
    Method::POST,
    "/api/v1/keys/get",
    Some(json!({"keys": ["plain", "missing", "user/1/age"]})),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!(["x", null, 30]));
}

#[tokio::test]
async fn test_create_conflict_writes_nothing() {
  let (registry, app) = setup();
  call(&app, Method::POST, "/api/v1/keys", Some(json!({"entries": {"a": 1}}))).await;

  let (status, _) = call(
    &app,
    Method::POST,
    "/api/v1/keys",
    Some(json!({"entries": {"a": 2, "b": 3}})),
  )
  .await;
  assert_eq!(status, StatusCode::CONFLICT);

  let cache = registry.default_cache().unwrap();
  assert_eq!(cache.get("a").unwrap(), Value::from(1i64));
  assert!(!cache.exists("b"));
}

#[tokio::test]
async fn test_create_with_ttl() {
  let (registry, app) = setup();
  let (status, _) = call(
    &app,
    Method::POST,
    "/api/v1/keys",
    Some(json!({"entries": {"session": "abc"}, "ttl": {"session": 60000}})),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  let left = registry.default_cache().unwrap().key_ttl("session").unwrap().unwrap();
  assert!(left.as_secs() >= 58 && left.as_secs() <= 60);

  let (status, _) = call(
    &app,
    Method::POST,
    "/api/v1/keys",
    Some(json!({"entries": {"other": 1}, "ttl": {"elsewhere": 1000}})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, _) = call(
    &app,
    Method::POST,
    "/api/v1/keys",
    Some(json!({"entries": {"n/x": 1}, "ttl": {"n/x": 1000}})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_replace_put_and_delete() {
  let (registry, app) = setup();
  call(&app, Method::POST, "/api/v1/keys", Some(json!({"entries": {"a": 1, "b": 2}}))).await;

  let (status, _) = call(
    &app,
    Method::PUT,
    "/api/v1/keys",
    Some(json!({"entries": {"a": 10, "b": 20}})),
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let (status, _) = call(
    &app,
    Method::PUT,
    "/api/v1/keys",
    Some(json!({"entries": {"a": 11, "nope": 1}})),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let (status, _) = call(
    &app,
    Method::PUT,
    "/api/v1/keys/c",
    Some(json!({"value": [1, 2], "ttl": 30000})),
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let cache = registry.default_cache().unwrap();
  assert_eq!(cache.get("a").unwrap(), Value::from(10i64));
  assert!(cache.key_ttl("c").unwrap().is_some());

  let (status, _) = call(&app, Method::DELETE, "/api/v1/keys/a", None).await;
  assert_eq!(status, StatusCode::OK);
  let (status, _) = call(
    &app,
    Method::POST,
    "/api/v1/keys/delete",
    Some(json!({"keys": ["b", "c"]})),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert!(cache.is_empty());

  let (status, _) = call(&app, Method::POST, "/api/v1/keys/delete", Some(json!({"keys": []}))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_put_with_bad_ttl_writes_nothing() {
  let (registry, app) = setup();
  call(&app, Method::POST, "/api/v1/keys", Some(json!({"entries": {"a": {"b": 1}}}))).await;

  let (status, _) = call(
    &app,
    Method::PUT,
    "/api/v1/keys/a/b",
    Some(json!({"value": 2, "ttl": 1000})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, _) = call(
    &app,
    Method::PUT,
    "/api/v1/keys/fresh",
    Some(json!({"value": 1, "ttl": u64::MAX})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let cache = registry.default_cache().unwrap();
  assert_eq!(cache.get("a/b").unwrap(), Value::from(1i64));
  assert!(!cache.exists("fresh"));
}

#[tokio::test]
async fn test_patch_is_atomic() {
  let (registry, app) = setup();
  call(&app, Method::POST, "/api/v1/keys", Some(json!({"entries": {"n": 1, "s": "x"}}))).await;

  let (status, _) = call(
    &app,
    Method::PATCH,
    "/api/v1/keys",
    Some(json!({"operations": [
      {"type": "INC", "key": "n", "value": 4},
      {"type": "CREATE", "key": "fresh", "value": true}
    ]})),
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let (status, _) = call(
    &app,
    Method::PATCH,
    "/api/v1/keys",
    Some(json!({"operations": [
      {"type": "INC", "key": "n"},
      {"type": "INC", "key": "s"}
    ]})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let cache = registry.default_cache().unwrap();
  assert_eq!(cache.get("n").unwrap(), Value::from(5i64));
  assert_eq!(cache.get("fresh").unwrap(), Value::Bool(true));
}

// =============================================================================
// Commands and triggers
// =============================================================================

#[tokio::test]
async fn test_execute_returns_last_result() {
  let (_, app) = setup();
  let (status, body) = call(
    &app,
    Method::POST,
    "/api/v1/commands/execute",
    Some(json!({"commands": [
      {"type": "CREATE", "key": "n", "value": 2},
      {"type": "INC", "key": "n", "value": 3},
      {"type": "GET", "key": "n"}
    ]})),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"result": 5}));

  let (status, _) = call(
    &app,
    Method::POST,
    "/api/v1/commands/execute",
    Some(json!({"commands": [{"type": "BOGUS"}]})),
  )
  .await;
  assert!(status.is_client_error());
}

#[tokio::test]
async fn test_trigger_lifecycle() {
  let (registry, app) = setup();
  call(
    &app,
    Method::POST,
    "/api/v1/keys",
    Some(json!({"entries": {"hits": 0, "page": "a"}})),
  )
  .await;

  let (status, body) = call(
    &app,
    Method::POST,
    "/api/v1/triggers",
    Some(json!({"key": "page", "command": {"type": "INC", "key": "hits"}})),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  let id = body["id"].as_str().unwrap().to_string();

  let (_, body) = call(&app, Method::GET, "/api/v1/triggers", None).await;
  assert_eq!(body["triggers"][0]["id"], json!(id));
  assert_eq!(body["triggers"][0]["key"], json!("page"));

  call(&app, Method::PUT, "/api/v1/keys/page", Some(json!({"value": "b"}))).await;
  let cache = registry.default_cache().unwrap();
  assert_eq!(cache.get("hits").unwrap(), Value::from(1i64));

  let (status, _) = call(
    &app,
    Method::PUT,
    &format!("/api/v1/triggers/{}", id),
    Some(json!({"key": "page", "command": {"type": "INC", "key": "hits", "value": 10}})),
  )
  .await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  call(&app, Method::PUT, "/api/v1/keys/page", Some(json!({"value": "c"}))).await;
  assert_eq!(cache.get("hits").unwrap(), Value::from(11i64));

  let (status, _) = call(&app, Method::DELETE, &format!("/api/v1/triggers/{}", id), None).await;
  assert_eq!(status, StatusCode::OK);
  let (status, _) = call(&app, Method::DELETE, &format!("/api/v1/triggers/{}", id), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(cache.triggers().is_empty());
}

// =============================================================================
// Caches
// =============================================================================

#[tokio::test]
async fn test_cache_header_routes_requests() {
  let (registry, app) = setup();
  let (status, _) = call(&app, Method::POST, "/api/v1/caches", Some(json!({"name": "tenant"}))).await;
  assert_eq!(status, StatusCode::CREATED);

  let (status, _) = send(
    &app,
    Method::POST,
    "/api/v1/keys",
    Some(json!({"entries": {"k": "tenant-value"}})),
    &[(CACHE_HEADER, "tenant")],
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);

  assert!(!registry.default_cache().unwrap().exists("k"));
  let (_, body) = send(&app, Method::GET, "/api/v1/keys/k", None, &[("X-Cache-Name", "tenant")]).await;
  assert_eq!(body, json!("tenant-value"));

  let (status, _) = send(&app, Method::GET, "/api/v1/keys/k", None, &[(CACHE_HEADER, "ghost")]).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cache_management() {
  let (registry, app) = setup();
  let (status, _) = call(
    &app,
    Method::POST,
    "/api/v1/caches",
    Some(json!({"name": "temp", "ttl": 60000})),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  let (status, _) = call(&app, Method::POST, "/api/v1/caches", Some(json!({"name": "temp"}))).await;
  assert_eq!(status, StatusCode::CONFLICT);

  let (_, body) = call(&app, Method::GET, "/api/v1/caches", None).await;
  assert_eq!(body, json!([registry.default_name(), "temp"]));

  let (_, body) = call(&app, Method::GET, "/api/v1/caches/stats", None).await;
  let stats = body["caches"].as_array().unwrap();
  let temp = stats.iter().find(|s| s["name"] == "temp").unwrap();
  assert!(temp["ttl_ms"].as_i64().unwrap() > 0);

  let (status, _) = call(&app, Method::PUT, "/api/v1/caches/temp", Some(json!({"ttl": null}))).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  assert!(registry.fetch_cache("temp").unwrap().expiration().is_none());

  let default_uri = format!("/api/v1/caches/{}", registry.default_name());
  let (status, _) = call(&app, Method::PUT, &default_uri, Some(json!({"ttl": 1000}))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  let (status, _) = call(&app, Method::DELETE, &default_uri, None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, _) = call(&app, Method::DELETE, "/api/v1/caches/temp", None).await;
  assert_eq!(status, StatusCode::OK);
  let (status, _) = call(&app, Method::DELETE, "/api/v1/caches/temp", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Admin
// =============================================================================

#[tokio::test]
async fn test_backup_and_restore() {
  let dir = tempfile::tempdir().unwrap();
  let settings = CacheSettings {
    snapshot_dir: dir.path().to_path_buf(),
    ..CacheSettings::default()
  };
  let registry = Registry::new(settings);
  let app = router(AppState::new(registry.clone(), ServerConfig::default()));

  call(&app, Method::POST, "/api/v1/keys", Some(json!({"entries": {"a": 1, "b": {"c": 2}}}))).await;

  let (status, body) = call(
    &app,
    Method::POST,
    "/admin/backup",
    Some(json!({"filename": "snap.json"})),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert!(body["path"].as_str().unwrap().ends_with("snap.json"));
  assert!(dir.path().join("snap.json").exists());

  let (status, body) = call(
    &app,
    Method::POST,
    "/admin/restore",
    Some(json!({"cache": "copy", "filename": "snap.json"})),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"keys": 2}));
  assert_eq!(
    registry.fetch_cache("copy").unwrap().get("b/c").unwrap(),
    Value::from(2i64)
  );

  let (status, _) = call(
    &app,
    Method::POST,
    "/admin/backup",
    Some(json!({"filename": "../escape.json"})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_requires_token_when_enabled() {
  let dir = tempfile::tempdir().unwrap();
  let settings = CacheSettings {
    snapshot_dir: dir.path().to_path_buf(),
    ..CacheSettings::default()
  };
  let registry = Registry::new(settings);
  let mut config = ServerConfig::default();
  config.auth.enabled = true;
  config.auth.admin_token = Some("secret".into());
  let app = router(AppState::new(registry, config));

  let body = Some(json!({"filename": "snap.json"}));
  let (status, _) = call(&app, Method::POST, "/admin/backup", body.clone()).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);

  let (status, _) = send(
    &app,
    Method::POST,
    "/admin/backup",
    body.clone(),
    &[("authorization", "Bearer wrong")],
  )
  .await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);

  let (status, _) = send(
    &app,
    Method::POST,
    "/admin/backup",
    body,
    &[("authorization", "Bearer secret")],
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  // Data routes stay open.
  let (status, _) = call(&app, Method::GET, "/healthz", None).await;
  assert_eq!(status, StatusCode::OK);
}
