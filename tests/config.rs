//! Configuration loading: defaults, YAML overrides and environment expansion

use mapcache::cache::DEFAULT_CACHE;
use mapcache::server::ServerConfig;
use std::path::PathBuf;
use tokio_test::{assert_err, assert_ok};

// =============================================================================
// Defaults
// =============================================================================

#[test]
fn test_defaults() {
  let config = ServerConfig::default();
  assert_eq!(config.server.host, "0.0.0.0");
  assert_eq!(config.server.ports.http, 8080);
  assert_eq!(config.server.ports.resp, 6379);
  assert_eq!(config.server.cors_origins, vec!["*".to_string()]);
  assert_eq!(config.cache.default_cache, DEFAULT_CACHE);
  assert_eq!(config.cache.max_cascade_depth, 64);
  assert!(config.cache.protect_default);
  assert_eq!(config.snapshot.dir, PathBuf::from("./backups"));
  assert_eq!(config.logging.level, "info");
  assert!(!config.auth.enabled, "Auth should be disabled by default");
  assert!(config.auth.admin_token.is_none());
}

#[test]
fn test_empty_sections_use_defaults() {
  let yaml = r#"
server: {}
cache: {}
"#;
  let config = ServerConfig::from_yaml(yaml).unwrap();
  assert_eq!(config.server.ports.http, 8080);
  assert_eq!(config.cache.max_cascade_depth, 64);
}

// =============================================================================
// Overrides
// =============================================================================

#[test]
fn test_yaml_overrides() {
  let yaml = r#"
server:
  host: 127.0.0.1
  ports:
    http: 9000
  cors_origins:
    - https://app.example.com
cache:
  default_cache: main
  max_cascade_depth: 8
  protect_default: false
snapshot:
  dir: /var/lib/mapcache
logging:
  level: debug
auth:
  enabled: true
  admin_token: s3cret
"#;
  let config = ServerConfig::from_yaml(yaml).unwrap();
  assert_eq!(config.http_address(), "127.0.0.1:9000");
  assert_eq!(config.resp_address(), "127.0.0.1:6379");
  assert_eq!(config.server.cors_origins, vec!["https://app.example.com"]);
  assert_eq!(config.logging.level, "debug");
  assert!(config.auth.enabled);
  assert_eq!(config.auth.admin_token.as_deref(), Some("s3cret"));

  let settings = config.cache_settings();
  assert_eq!(settings.max_cascade_depth, 8);
  assert_eq!(settings.snapshot_dir, PathBuf::from("/var/lib/mapcache"));

  let options = config.registry_options();
  assert_eq!(options.default_cache, "main");
  assert!(!options.protect_default);
}

#[test]
fn test_env_expansion_in_yaml() {
  std::env::set_var("MAPCACHE_CFG_TEST_TOKEN", "from-env");
  std::env::set_var("MAPCACHE_CFG_TEST_PORT", "7100");
  let yaml = r#"
server:
  ports:
    resp: ${MAPCACHE_CFG_TEST_PORT}
auth:
  admin_token: $MAPCACHE_CFG_TEST_TOKEN
"#;
  let config = ServerConfig::from_yaml(yaml).unwrap();
  assert_eq!(config.server.ports.resp, 7100);
  assert_eq!(config.auth.admin_token.as_deref(), Some("from-env"));
}

#[test]
fn test_invalid_yaml_is_an_error() {
  assert_err!(ServerConfig::from_yaml("server: [unclosed"));
  assert_err!(ServerConfig::from_yaml("server:\n  ports:\n    http: not-a-port"));
}

#[test]
fn test_from_file() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("mapcache.yaml");
  std::fs::write(&path, "cache:\n  default_cache: files\n").unwrap();
  let config = assert_ok!(ServerConfig::from_file(&path));
  assert_eq!(config.cache.default_cache, "files");

  assert_err!(ServerConfig::from_file(dir.path().join("missing.yaml")));
}
