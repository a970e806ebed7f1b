//! Kernel error type

use thiserror::Error;

/// Errors returned by cache kernel operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("key already exists: {0}")]
  KeyAlreadyExists(String),

  #[error("cache already exists: {0}")]
  CacheAlreadyExists(String),

  #[error("type mismatch: {0}")]
  TypeMismatch(String),

  #[error("arithmetic error: {0}")]
  Arithmetic(String),

  #[error("validation error: {0}")]
  Validation(String),

  #[error("parse error: {0}")]
  Parse(String),

  #[error("io error: {0}")]
  Io(String),

  #[error("operation canceled")]
  Canceled,

  #[error("trigger recursion depth limit exceeded (max: {max}), possible infinite loop")]
  CascadeOverflow { max: usize },

  #[error("trigger {id} failed: {message}")]
  TriggerFailed { id: String, message: String },

  #[error("unauthorized: {0}")]
  Unauthorized(String),
}

impl CacheError {
  pub fn not_found(what: impl std::fmt::Display) -> Self {
    CacheError::NotFound(what.to_string())
  }

  pub fn validation(msg: impl Into<String>) -> Self {
    CacheError::Validation(msg.into())
  }

  pub fn type_mismatch(msg: impl Into<String>) -> Self {
    CacheError::TypeMismatch(msg.into())
  }

  /// True for errors a client caused by sending a bad request.
  pub fn is_client_error(&self) -> bool {
    matches!(
      self,
      CacheError::Validation(_)
        | CacheError::Parse(_)
        | CacheError::TypeMismatch(_)
        | CacheError::Arithmetic(_)
    )
  }
}

impl From<std::io::Error> for CacheError {
  fn from(e: std::io::Error) -> Self {
    CacheError::Io(e.to_string())
  }
}

impl From<serde_json::Error> for CacheError {
  fn from(e: serde_json::Error) -> Self {
    if e.is_io() {
      CacheError::Io(e.to_string())
    } else {
      CacheError::Parse(e.to_string())
    }
  }
}

pub type CacheResult<T> = Result<T, CacheError>;
