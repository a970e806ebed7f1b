//! Recursive value tree stored under every cache key

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Largest magnitude at which an f64 still represents every integer exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A JSON-compatible value.
///
/// Numbers are always doubles. Integer-valued numbers are written back out as
/// JSON integers so `3` stays `3` after an increment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
  #[default]
  Null,
  Bool(bool),
  Number(f64),
  String(String),
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
}

impl Value {
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Bool(_) => "boolean",
      Value::Number(_) => "number",
      Value::String(_) => "string",
      Value::List(_) => "list",
      Value::Map(_) => "map",
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&Vec<Value>> {
    match self {
      Value::List(items) => Some(items),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
    match self {
      Value::Map(map) => Some(map),
      _ => None,
    }
  }

  /// Integer view of a number, if it has no fractional part.
  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Number(n) if is_integral(*n) => Some(*n as i64),
      _ => None,
    }
  }

  /// Child lookup by one path segment. Lists only accept decimal indices.
  pub fn child(&self, segment: &str) -> Option<&Value> {
    match self {
      Value::Map(map) => map.get(segment),
      Value::List(items) => parse_index(segment).and_then(|i| items.get(i)),
      _ => None,
    }
  }

  pub fn child_mut(&mut self, segment: &str) -> Option<&mut Value> {
    match self {
      Value::Map(map) => map.get_mut(segment),
      Value::List(items) => parse_index(segment).and_then(move |i| items.get_mut(i)),
      _ => None,
    }
  }

  /// Render for template substitution: strings raw, everything else compact.
  pub fn to_text(&self) -> String {
    match self {
      Value::String(s) => s.clone(),
      Value::Number(n) => format_number(*n),
      Value::Null => "null".to_string(),
      Value::Bool(b) => b.to_string(),
      other => serde_json::to_string(other).unwrap_or_default(),
    }
  }

  /// Rough in-memory footprint, used for cache statistics.
  pub fn approximate_size(&self) -> usize {
    match self {
      Value::Null | Value::Bool(_) => 1,
      Value::Number(_) => 8,
      Value::String(s) => s.len(),
      Value::List(items) => items.iter().map(Value::approximate_size).sum::<usize>() + 8,
      Value::Map(map) => {
        map
          .iter()
          .map(|(k, v)| k.len() + v.approximate_size())
          .sum::<usize>()
          + 8
      }
    }
  }
}

pub(crate) fn parse_index(segment: &str) -> Option<usize> {
  if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  segment.parse().ok()
}

fn is_integral(n: f64) -> bool {
  n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER
}

/// Format a number the way it is written on the wire.
pub fn format_number(n: f64) -> String {
  if is_integral(n) {
    format!("{}", n as i64)
  } else {
    n.to_string()
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_text())
  }
}

impl From<serde_json::Value> for Value {
  fn from(v: serde_json::Value) -> Self {
    match v {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(b),
      serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
      serde_json::Value::String(s) => Value::String(s),
      serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
      serde_json::Value::Object(map) => {
        Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
      }
    }
  }
}

impl From<Value> for serde_json::Value {
  fn from(v: Value) -> Self {
    match v {
      Value::Null => serde_json::Value::Null,
      Value::Bool(b) => serde_json::Value::Bool(b),
      Value::Number(n) if is_integral(n) => serde_json::Value::from(n as i64),
      Value::Number(n) => serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null),
      Value::String(s) => serde_json::Value::String(s),
      Value::List(items) => {
        serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
      }
      Value::Map(map) => serde_json::Value::Object(
        map
          .into_iter()
          .map(|(k, v)| (k, serde_json::Value::from(v)))
          .collect(),
      ),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    Value::Number(n)
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self {
    Value::Number(n as f64)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<Vec<Value>> for Value {
  fn from(items: Vec<Value>) -> Self {
    Value::List(items)
  }
}

impl From<BTreeMap<String, Value>> for Value {
  fn from(map: BTreeMap<String, Value>) -> Self {
    Value::Map(map)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_integer_numbers_serialize_as_integers() {
    let v = Value::Number(3.0);
    assert_eq!(serde_json::to_string(&v).unwrap(), "3");
    let v = Value::Number(2.5);
    assert_eq!(serde_json::to_string(&v).unwrap(), "2.5");
  }

  #[test]
  fn test_from_json() {
    let v: Value = serde_json::from_value(json!({"a": [1, "x", null, true]})).unwrap();
    let inner = v.child("a").unwrap();
    assert_eq!(inner.child("0"), Some(&Value::Number(1.0)));
    assert_eq!(inner.child("1"), Some(&Value::from("x")));
    assert_eq!(inner.child("2"), Some(&Value::Null));
    assert_eq!(inner.child("x"), None);
  }

  #[test]
  fn test_list_equality_is_elementwise() {
    let a = Value::List(vec![Value::from(1i64), Value::from("b")]);
    let b = Value::List(vec![Value::from(1i64), Value::from("b")]);
    assert_eq!(a, b);
  }

  #[test]
  fn test_to_text() {
    assert_eq!(Value::from("hi").to_text(), "hi");
    assert_eq!(Value::Number(10.0).to_text(), "10");
    assert_eq!(Value::Number(0.5).to_text(), "0.5");
    let map: Value = serde_json::from_value(json!({"k": 1})).unwrap();
    assert_eq!(map.to_text(), r#"{"k":1}"#);
  }

  #[test]
  fn test_index_parsing() {
    assert_eq!(parse_index("0"), Some(0));
    assert_eq!(parse_index("12"), Some(12));
    assert_eq!(parse_index("-1"), None);
    assert_eq!(parse_index("+1"), None);
    assert_eq!(parse_index(""), None);
  }
}
