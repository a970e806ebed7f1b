use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::{CacheSettings, RegistryOptions, DEFAULT_CACHE, DEFAULT_MAX_CASCADE_DEPTH};

/// Expand environment variables in a string.
/// Supports $VAR_NAME and ${VAR_NAME} syntax.
fn expand_env_vars(input: &str) -> String {
  let mut result = input.to_string();

  // ${VAR_NAME} first, it is the more specific form
  while let Some(start) = result.find("${") {
    if let Some(end) = result[start..].find('}') {
      let var_name = &result[start + 2..start + end];
      let value = std::env::var(var_name).unwrap_or_default();
      result = format!(
        "{}{}{}",
        &result[..start],
        value,
        &result[start + end + 1..]
      );
    } else {
      break;
    }
  }

  // $VAR_NAME ends at the first char that is not alphanumeric or underscore
  let mut i = 0;
  while i < result.len() {
    if result[i..].starts_with('$') && !result[i..].starts_with("${") {
      let rest = &result[i + 1..];
      let var_len = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
      if var_len > 0 {
        let var_name = &rest[..var_len];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..i], value, &rest[var_len..]);
        i += value.len();
        continue;
      }
    }
    i += 1;
  }

  result
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub cache: CacheSection,
  #[serde(default)]
  pub snapshot: SnapshotSection,
  #[serde(default)]
  pub logging: LoggingSection,
  #[serde(default)]
  pub auth: AuthSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default)]
  pub ports: PortsSection,
  /// CORS allowed origins for the HTTP API.
  /// Use ["*"] for permissive mode, or list origins like ["http://localhost:3000"]
  #[serde(default = "default_cors_origins")]
  pub cors_origins: Vec<String>,
}

fn default_host() -> String {
  "0.0.0.0".into()
}

fn default_cors_origins() -> Vec<String> {
  vec!["*".to_string()]
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      host: default_host(),
      ports: PortsSection::default(),
      cors_origins: default_cors_origins(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsSection {
  #[serde(default = "default_http_port")]
  pub http: u16,
  #[serde(default = "default_resp_port")]
  pub resp: u16,
}

fn default_http_port() -> u16 {
  8080
}
fn default_resp_port() -> u16 {
  6379
}

impl Default for PortsSection {
  fn default() -> Self {
    Self {
      http: default_http_port(),
      resp: default_resp_port(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
  /// Cache used when a request names none; RESP sessions start on it.
  #[serde(default = "default_cache_name")]
  pub default_cache: String,
  /// Longest trigger chain before a cascade is cut off.
  #[serde(default = "default_max_cascade_depth")]
  pub max_cascade_depth: usize,
  /// Refuse deleting the default cache or giving it a TTL.
  #[serde(default = "default_true")]
  pub protect_default: bool,
}

fn default_cache_name() -> String {
  DEFAULT_CACHE.into()
}
fn default_max_cascade_depth() -> usize {
  DEFAULT_MAX_CASCADE_DEPTH
}
fn default_true() -> bool {
  true
}

impl Default for CacheSection {
  fn default() -> Self {
    Self {
      default_cache: default_cache_name(),
      max_cascade_depth: default_max_cascade_depth(),
      protect_default: true,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSection {
  /// Base directory for BACKUP and RESTORE filenames.
  #[serde(default = "default_snapshot_dir")]
  pub dir: PathBuf,
}

fn default_snapshot_dir() -> PathBuf {
  PathBuf::from("./backups")
}

impl Default for SnapshotSection {
  fn default() -> Self {
    Self {
      dir: default_snapshot_dir(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}
fn default_level() -> String {
  "info".into()
}
impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

/// Bearer-token check on the admin routes. Off unless enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSection {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub admin_token: Option<String>,
}

impl ServerConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  /// Parse YAML after environment expansion.
  pub fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
    let expanded = expand_env_vars(content);
    Ok(serde_yaml::from_str(&expanded)?)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for p in ["mapcache.yaml", "mapcache.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  pub fn http_address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.ports.http)
  }

  pub fn resp_address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.ports.resp)
  }

  pub fn cache_settings(&self) -> CacheSettings {
    CacheSettings {
      max_cascade_depth: self.cache.max_cascade_depth,
      snapshot_dir: self.snapshot.dir.clone(),
    }
  }

  pub fn registry_options(&self) -> RegistryOptions {
    RegistryOptions {
      default_cache: self.cache.default_cache.clone(),
      protect_default: self.cache.protect_default,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_expand_env_vars() {
    std::env::set_var("MAPCACHE_TEST_PORT", "7000");
    assert_eq!(expand_env_vars("port: ${MAPCACHE_TEST_PORT}"), "port: 7000");
    assert_eq!(expand_env_vars("port: $MAPCACHE_TEST_PORT!"), "port: 7000!");
    assert_eq!(expand_env_vars("cost: $"), "cost: $");
    assert_eq!(expand_env_vars("x: ${MAPCACHE_TEST_UNSET_VAR}"), "x: ");
  }

  #[test]
  fn test_addresses() {
    let config = ServerConfig::default();
    assert_eq!(config.http_address(), "0.0.0.0:8080");
    assert_eq!(config.resp_address(), "0.0.0.0:6379");
  }
}
