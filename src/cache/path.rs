//! Hierarchical key paths (`a/b/c`) and wildcard patterns (`a/*/c`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::CacheError;

pub const SEPARATOR: char = '/';
pub const WILDCARD: &str = "*";

/// A non-empty sequence of non-empty segments.
///
/// The colon form `a:b:c` is accepted and normalized to `a/b/c`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
  segments: Vec<String>,
}

impl Path {
  pub fn parse(raw: &str) -> Result<Self, CacheError> {
    let normalized = raw.trim().replace(':', "/");
    if normalized.is_empty() {
      return Err(CacheError::validation("empty key"));
    }
    let segments: Vec<String> = normalized.split(SEPARATOR).map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
      return Err(CacheError::validation(format!(
        "invalid key '{}': empty path segment",
        raw
      )));
    }
    Ok(Self { segments })
  }

  pub fn from_segments(segments: Vec<String>) -> Result<Self, CacheError> {
    if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
      return Err(CacheError::validation("empty path segment"));
    }
    Ok(Self { segments })
  }

  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  pub fn len(&self) -> usize {
    self.segments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  /// The top-level key, the unit of expiration.
  pub fn top(&self) -> &str {
    &self.segments[0]
  }

  pub fn is_top_level(&self) -> bool {
    self.segments.len() == 1
  }

  pub fn has_wildcard(&self) -> bool {
    self.segments.iter().any(|s| s == WILDCARD)
  }

  pub fn child(&self, segment: impl Into<String>) -> Path {
    let mut segments = self.segments.clone();
    segments.push(segment.into());
    Path { segments }
  }

  /// Match a concrete path against this pattern.
  ///
  /// Returns the segments captured by `*`, in pattern order, when both have
  /// the same length and every literal segment is equal.
  pub fn captures(&self, path: &Path) -> Option<Vec<String>> {
    if self.segments.len() != path.segments.len() {
      return None;
    }
    let mut captured = Vec::new();
    for (pat, seg) in self.segments.iter().zip(&path.segments) {
      if pat == WILDCARD {
        captured.push(seg.clone());
      } else if pat != seg {
        return None;
      }
    }
    Some(captured)
  }
}

impl fmt::Display for Path {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.segments.join("/"))
  }
}

impl FromStr for Path {
  type Err = CacheError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Path::parse(s)
  }
}

impl TryFrom<String> for Path {
  type Error = CacheError;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    Path::parse(&s)
  }
}

impl From<Path> for String {
  fn from(p: Path) -> Self {
    p.to_string()
  }
}
