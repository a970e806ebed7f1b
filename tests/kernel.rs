//! End-to-end kernel scenarios and invariants

use mapcache::cache::{
  Cache, CacheError, CacheSettings, Command, PatchOp, Registry, Value, DEFAULT_CACHE,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn cache() -> Arc<Cache> {
  Cache::new("test", Arc::new(CacheSettings::default()))
}

fn command(v: serde_json::Value) -> Command {
  serde_json::from_value(v).unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_counter_to_status_cascade() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard
    .create(
      "task/1",
      Value::from(json!({"countdown": 3, "status": "pending"})),
    )
    .unwrap();
  guard
    .create_trigger(
      "task/1/countdown",
      Command::when(
        "${{task/1/countdown}} == 0",
        Command::replace("task/1/status", "complete"),
        Command::Noop,
      ),
    )
    .unwrap();

  for _ in 0..3 {
    guard.increment("task/1/countdown", -1.0).unwrap();
  }
  drop(guard);

  assert_eq!(
    cache.get("task/1").unwrap(),
    Value::from(json!({"countdown": 0, "status": "complete"}))
  );
}

#[tokio::test]
async fn test_wildcard_capture_interpolation() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard
    .create_trigger(
      "stages/*/countdown",
      command(json!({
        "type": "IF",
        "condition": "${{stages/${{1}}/countdown}} == 0",
        "if_true": {"type": "REPLACE", "key": "stages/${{1}}/status", "value": "done"},
        "if_false": {"type": "NOOP"}
      })),
    )
    .unwrap();
  guard
    .create(
      "stages",
      Value::from(json!({
        "1": {"countdown": 1},
        "2": {"countdown": 1},
        "3": {"countdown": 1}
      })),
    )
    .unwrap();

  for stage in ["1", "2", "3"] {
    guard
      .decrement(&format!("stages/{}/countdown", stage), 1.0)
      .unwrap();
  }
  drop(guard);

  for stage in ["1", "2", "3"] {
    assert_eq!(
      cache.get(&format!("stages/{}/status", stage)).unwrap(),
      Value::from("done")
    );
  }
}

#[tokio::test]
async fn test_unchanged_replace_does_not_fire() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.create("count", 0i64).unwrap();
  guard.create_trigger("k", Command::inc("count", 1.0)).unwrap();

  guard.replace("k", "x").unwrap();
  guard.replace("k", "x").unwrap();

  assert_eq!(guard.get("count").unwrap(), Value::from(1i64));
}

#[tokio::test]
async fn test_snapshot_round_trip() {
  let dir = tempfile::tempdir().unwrap();
  let settings = CacheSettings {
    snapshot_dir: dir.path().to_path_buf(),
    ..Default::default()
  };

  let source = Registry::new(settings.clone());
  let cache = source.add_cache("snap").unwrap();
  let trigger_id = {
    let mut guard = cache.acquire("test").await;
    guard.create("a", 1i64).unwrap();
    guard.create("b", "two").unwrap();
    guard.create("c", Value::from(json!({"x": [1, 2]}))).unwrap();
    guard.set_key_ttl("a", Duration::from_secs(3600)).unwrap();
    guard
      .create_trigger("b", Command::replace("c/x", "changed"))
      .unwrap()
  };
  source.backup(Some("snap"), "snap.json").await.unwrap();

  let target = Registry::new(settings);
  let installed = target.restore(Some("snap"), "snap.json").await.unwrap();
  assert_eq!(installed, 3);

  let restored = target.fetch_cache("snap").unwrap();
  assert_eq!(restored.get("a").unwrap(), Value::from(1i64));
  assert_eq!(restored.get("b").unwrap(), Value::from("two"));
  assert_eq!(
    restored.get("c").unwrap(),
    Value::from(json!({"x": [1, 2]}))
  );

  let ttl = restored.key_ttl("a").unwrap().unwrap();
  assert!((3598..=3600).contains(&ttl.as_secs()), "ttl was {:?}", ttl);
  assert_eq!(restored.key_ttl("b").unwrap(), None);

  let trigger = restored.trigger(&trigger_id).unwrap();
  assert_eq!(trigger.key, "b");
  assert_eq!(trigger.command, Command::replace("c/x", "changed"));

  source.shutdown();
  target.shutdown();
}

#[tokio::test]
async fn test_increment_type_mismatch() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.create("s", "hello").unwrap();

  let err = guard.increment("s", 1.0).unwrap_err();
  assert!(matches!(err, CacheError::TypeMismatch(_)));
  assert_eq!(guard.get("s").unwrap(), Value::from("hello"));
}

#[tokio::test]
async fn test_cascade_overflow() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.create("a", 0i64).unwrap();
  guard.create("b", 0i64).unwrap();
  guard.create_trigger("a", Command::inc("b", 1.0)).unwrap();
  guard.create_trigger("b", Command::inc("a", 1.0)).unwrap();

  let err = guard.increment("a", 1.0).unwrap_err();
  assert_eq!(err, CacheError::CascadeOverflow { max: 64 });

  // One direct increment plus 64 firings alternating b, a, b, ...
  assert_eq!(guard.get("a").unwrap(), Value::from(33i64));
  assert_eq!(guard.get("b").unwrap(), Value::from(32i64));
}

// =============================================================================
// Invariants
// =============================================================================

#[tokio::test]
async fn test_expired_key_is_never_read() {
  let cache = cache();
  {
    let mut guard = cache.acquire("test").await;
    guard.create("session", "abc").unwrap();
    guard.set_key_ttl("session", Duration::from_millis(50)).unwrap();
  }
  assert!(cache.get("session").is_ok());

  tokio::time::sleep(Duration::from_millis(200)).await;
  assert!(matches!(cache.get("session"), Err(CacheError::NotFound(_))));
  assert!(!cache.keys().contains(&"session".to_string()));
}

#[tokio::test]
async fn test_reset_ttl_cancels_earlier_timer() {
  let cache = cache();
  {
    let mut guard = cache.acquire("test").await;
    guard.create("k", 1i64).unwrap();
    guard.set_key_ttl("k", Duration::from_millis(50)).unwrap();
    guard.set_key_ttl("k", Duration::from_secs(60)).unwrap();
  }

  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(cache.get("k").unwrap(), Value::from(1i64));
  assert!(cache.key_ttl("k").unwrap().is_some());
}

#[tokio::test]
async fn test_recreated_key_outlives_old_ttl_in_one_command() {
  let cache = cache();
  {
    let mut guard = cache.acquire("test").await;
    guard.replace("k", "old").unwrap();
    guard.set_key_ttl("k", Duration::from_millis(50)).unwrap();
    guard
      .execute(&[command(json!({"type": "COMMANDS", "commands": [
        {"type": "DELETE", "key": "k"},
        {"type": "CREATE", "key": "k", "value": "new"}
      ]}))])
      .unwrap();
  }
  assert_eq!(cache.key_ttl("k").unwrap(), None);

  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(cache.get("k").unwrap(), Value::from("new"));
}

#[tokio::test]
async fn test_recreated_key_outlives_old_ttl_in_one_patch() {
  let cache = cache();
  {
    let mut guard = cache.acquire("test").await;
    guard.replace("k", "old").unwrap();
    guard.set_key_ttl("k", Duration::from_millis(50)).unwrap();
    guard
      .patch(&[
        PatchOp::Delete { key: "k".into() },
        PatchOp::Create {
          key: "k".into(),
          value: Value::from("new"),
        },
      ])
      .unwrap();
  }
  assert_eq!(cache.key_ttl("k").unwrap(), None);

  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(cache.get("k").unwrap(), Value::from("new"));
}

#[tokio::test]
async fn test_failed_patch_keeps_ttl_of_deleted_key() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.replace("k", 1i64).unwrap();
  guard.set_key_ttl("k", Duration::from_secs(60)).unwrap();
  assert!(guard
    .patch(&[
      PatchOp::Delete { key: "k".into() },
      PatchOp::Inc {
        key: "missing".into(),
        value: 1.0,
      },
    ])
    .is_err());
  assert!(guard.key_ttl("k").unwrap().is_some());
}

#[tokio::test]
async fn test_ttl_out_of_range_is_rejected() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.create("k", 1i64).unwrap();
  assert!(matches!(
    guard.set_key_ttl("k", Duration::from_millis(9_223_372_036_854_775_000)),
    Err(CacheError::Validation(_))
  ));
  assert!(matches!(
    guard.set_key_ttl("k", Duration::MAX),
    Err(CacheError::Validation(_))
  ));
  assert_eq!(guard.key_ttl("k").unwrap(), None);
  drop(guard);

  let registry = Registry::new(CacheSettings::default());
  let other = registry.add_cache("other").unwrap();
  let mut guard = other.acquire("test").await;
  assert!(matches!(
    guard.set_cache_ttl(Some(Duration::from_millis(9_223_372_036_854_775_000))),
    Err(CacheError::Validation(_))
  ));
  drop(guard);
  assert!(other.expiration().is_none());
}

#[tokio::test]
async fn test_ttl_on_nested_path_is_rejected() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.create("a", Value::from(json!({"b": 1}))).unwrap();
  assert!(matches!(
    guard.set_key_ttl("a/b", Duration::from_secs(1)),
    Err(CacheError::Validation(_))
  ));
}

#[tokio::test]
async fn test_trigger_captures_match_path() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.create("fired", 0i64).unwrap();
  guard
    .create_trigger(
      "users/*/name",
      command(json!({"type": "COMMANDS", "commands": [
        {"type": "REPLACE", "key": "last", "value": "user-${{1}}"},
        {"type": "INC", "key": "fired"}
      ]})),
    )
    .unwrap();

  guard.replace("users/7/name", "ann").unwrap();
  assert_eq!(guard.get("last").unwrap(), Value::from("user-7"));
  assert_eq!(guard.get("fired").unwrap(), Value::from(1i64));

  // Parent writes do not match the child pattern.
  guard
    .replace("users/8", Value::from(json!({"name": "bob"})))
    .unwrap();
  assert_eq!(guard.get("fired").unwrap(), Value::from(1i64));
}

#[tokio::test]
async fn test_increments_add_up() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.create("x", 10i64).unwrap();
  guard.increment("x", 2.0).unwrap();
  guard.increment("x", 3.0).unwrap();
  assert_eq!(guard.get("x").unwrap(), Value::from(15i64));
}

#[tokio::test]
async fn test_patch_is_all_or_nothing() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  let err = guard
    .patch(&[
      PatchOp::Create {
        key: "x".into(),
        value: Value::from(1i64),
      },
      PatchOp::Inc {
        key: "missing".into(),
        value: 1.0,
      },
    ])
    .unwrap_err();
  assert!(matches!(err, CacheError::NotFound(_)));
  drop(guard);
  assert!(!cache.exists("x"));
}

#[tokio::test]
async fn test_increment_overflow_is_arithmetic_error() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.create("big", f64::MAX).unwrap();

  let err = guard.increment("big", f64::MAX).unwrap_err();
  assert!(matches!(err, CacheError::Arithmetic(_)));
  assert_eq!(guard.get("big").unwrap(), Value::Number(f64::MAX));
}

#[tokio::test]
async fn test_replace_batch_is_all_or_nothing() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.create("a", Value::from(json!({"b": 0}))).unwrap();
  guard.create("counter", 0i64).unwrap();
  guard.create_trigger("a", Command::inc("counter", 1.0)).unwrap();

  // Both paths exist up front; the second write lands under the number
  // the first one installed.
  let err = guard
    .replace_batch(vec![
      ("a".into(), Value::from(1i64)),
      ("a/b".into(), Value::from(2i64)),
    ])
    .unwrap_err();
  assert!(matches!(err, CacheError::TypeMismatch(_)));
  assert_eq!(guard.get("a").unwrap(), Value::from(json!({"b": 0})));
  assert_eq!(guard.get("counter").unwrap(), Value::from(0i64));
}

#[tokio::test]
async fn test_create_existing_key_conflicts() {
  let cache = cache();
  let mut guard = cache.acquire("test").await;
  guard.create("k", 1i64).unwrap();
  assert!(matches!(
    guard.create_batch(vec![
      ("fresh".into(), Value::from(1i64)),
      ("k".into(), Value::from(2i64)),
    ]),
    Err(CacheError::KeyAlreadyExists(_))
  ));
  assert!(!guard.contains("fresh"));
  assert_eq!(guard.get("k").unwrap(), Value::from(1i64));
}

#[tokio::test]
async fn test_writers_serialize() {
  let cache = cache();
  {
    let mut guard = cache.acquire("setup").await;
    guard.create("n", 0i64).unwrap();
  }

  let mut tasks = Vec::new();
  for i in 0..16 {
    let cache = cache.clone();
    tasks.push(tokio::spawn(async move {
      let mut guard = cache.acquire(format!("writer-{}", i)).await;
      let current = guard.get("n").unwrap().as_i64().unwrap();
      tokio::task::yield_now().await;
      guard.replace("n", current + 1).unwrap();
    }));
  }
  for task in tasks {
    task.await.unwrap();
  }
  assert_eq!(cache.get("n").unwrap(), Value::from(16i64));
}

#[tokio::test]
async fn test_restore_drops_expired_keys() {
  let dir = tempfile::tempdir().unwrap();
  std::fs::write(
    dir.path().join("old.json"),
    json!({
      "data": {"stale": 1, "fresh": 2},
      "key_expirations": {"stale": 1000},
      "triggers": {},
      "expiration": null
    })
    .to_string(),
  )
  .unwrap();

  let registry = Registry::new(CacheSettings {
    snapshot_dir: dir.path().to_path_buf(),
    ..Default::default()
  });
  let installed = registry.restore(None, "old.json").await.unwrap();
  assert_eq!(installed, 1);

  let cache = registry.fetch_cache(DEFAULT_CACHE).unwrap();
  assert!(cache.get("stale").is_err());
  assert_eq!(cache.get("fresh").unwrap(), Value::from(2i64));
}

#[tokio::test]
async fn test_restore_rejects_past_cache_expiration() {
  let dir = tempfile::tempdir().unwrap();
  std::fs::write(
    dir.path().join("expired.json"),
    json!({"data": {"k": 1}, "expiration": 1000}).to_string(),
  )
  .unwrap();

  let registry = Registry::new(CacheSettings {
    snapshot_dir: dir.path().to_path_buf(),
    ..Default::default()
  });
  let cache = registry.add_cache("target").unwrap();
  {
    let mut guard = cache.acquire("test").await;
    guard.create("before", true).unwrap();
  }

  let err = registry
    .restore(Some("target"), "expired.json")
    .await
    .unwrap_err();
  assert!(matches!(err, CacheError::Validation(_)));
  assert_eq!(cache.get("before").unwrap(), Value::Bool(true));
  assert!(cache.get("k").is_err());
}

#[tokio::test]
async fn test_restore_into_protected_cache_ignores_past_expiration() {
  let dir = tempfile::tempdir().unwrap();
  std::fs::write(
    dir.path().join("expired.json"),
    json!({"data": {"k": 1}, "expiration": 1000}).to_string(),
  )
  .unwrap();

  let registry = Registry::new(CacheSettings {
    snapshot_dir: dir.path().to_path_buf(),
    ..Default::default()
  });
  let installed = registry.restore(None, "expired.json").await.unwrap();
  assert_eq!(installed, 1);

  let cache = registry.default_cache().unwrap();
  assert_eq!(cache.get("k").unwrap(), Value::from(1i64));
  assert!(cache.expiration().is_none());
}

#[tokio::test]
async fn test_snapshot_filename_must_stay_inside_dir() {
  let dir = tempfile::tempdir().unwrap();
  let registry = Registry::new(CacheSettings {
    snapshot_dir: dir.path().to_path_buf(),
    ..Default::default()
  });
  for name in ["../escape.json", "/abs.json"] {
    assert!(matches!(
      registry.backup(None, name).await,
      Err(CacheError::Validation(_))
    ));
  }
}
