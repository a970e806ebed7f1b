use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};

use crate::cache::CacheError;

/// Handler error rendered as `{"error": msg}`.
#[derive(Debug)]
pub enum AppError {
  Cache(CacheError),
  BadRequest(String),
  Unauthorized(String),
}

impl From<CacheError> for AppError {
  fn from(e: CacheError) -> Self {
    Self::Cache(e)
  }
}

impl AppError {
  pub fn status(&self) -> StatusCode {
    match self {
      Self::BadRequest(_) => StatusCode::BAD_REQUEST,
      Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      Self::Cache(e) => match e {
        CacheError::KeyAlreadyExists(_) | CacheError::CacheAlreadyExists(_) => StatusCode::CONFLICT,
        CacheError::NotFound(_) => StatusCode::NOT_FOUND,
        CacheError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        CacheError::Canceled => StatusCode::REQUEST_TIMEOUT,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
      },
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status();
    let msg = match self {
      Self::Cache(e) => {
        if status.is_server_error() {
          tracing::warn!("Request failed: {}", e);
        }
        e.to_string()
      }
      Self::BadRequest(msg) | Self::Unauthorized(msg) => msg,
    };
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_mapping() {
    let cases = [
      (CacheError::KeyAlreadyExists("a".into()), StatusCode::CONFLICT),
      (CacheError::CacheAlreadyExists("c".into()), StatusCode::CONFLICT),
      (CacheError::not_found("a"), StatusCode::NOT_FOUND),
      (CacheError::validation("bad"), StatusCode::BAD_REQUEST),
      (CacheError::Parse("bad".into()), StatusCode::BAD_REQUEST),
      (CacheError::type_mismatch("bad"), StatusCode::BAD_REQUEST),
      (CacheError::Arithmetic("inf".into()), StatusCode::BAD_REQUEST),
      (CacheError::Unauthorized("no".into()), StatusCode::UNAUTHORIZED),
      (CacheError::Canceled, StatusCode::REQUEST_TIMEOUT),
      (CacheError::CascadeOverflow { max: 64 }, StatusCode::INTERNAL_SERVER_ERROR),
      (CacheError::Io("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (err, status) in cases {
      assert_eq!(AppError::from(err).status(), status);
    }
  }
}
