//! `${{...}}` interpolation
//!
//! Nested interpolations are expanded innermost-first as a textual pre-pass:
//! `${{a/${{1}}/b}}` becomes `${{a/x/b}}` when the first capture is `x`. What
//! remains are flat interpolations, resolved against the tree as values.

use super::error::{CacheError, CacheResult};
use super::path::Path;
use super::tree::Tree;
use super::value::Value;

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

/// What a lookup of a missing path produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissing {
  /// Missing paths read as null (conditions).
  Null,
  /// Missing paths are NotFound (values, keys, templates).
  Fail,
}

/// Read-only view used while evaluating one command: the data plus the
/// wildcard captures of the trigger that fired (empty for user requests).
#[derive(Clone, Copy)]
pub struct Scope<'a> {
  pub tree: &'a Tree,
  pub captures: &'a [String],
}

impl<'a> Scope<'a> {
  pub fn new(tree: &'a Tree, captures: &'a [String]) -> Self {
    Self { tree, captures }
  }

  /// Expand every interpolation that sits inside another one.
  pub fn expand_nested(&self, text: &str) -> CacheResult<String> {
    let mut current = text.to_string();
    while let Some((start, end)) = innermost_nested(&current) {
      let body = &current[start + OPEN.len()..end - CLOSE.len()];
      let replacement = self.resolve(body, OnMissing::Fail)?.to_text();
      current.replace_range(start..end, &replacement);
    }
    Ok(current)
  }

  /// Resolve one flat interpolation body.
  pub fn resolve(&self, body: &str, missing: OnMissing) -> CacheResult<Value> {
    let body = body.trim();

    if body.contains("||") {
      return self.resolve_fallback(body);
    }

    if let Ok(n) = body.parse::<usize>() {
      if n >= 1 && n <= self.captures.len() {
        return Ok(Value::String(self.captures[n - 1].clone()));
      }
    }

    let path = Path::parse(body)?;
    if path.has_wildcard() {
      return Ok(Value::List(self.matching_values(&path)));
    }
    match self.tree.get(&path) {
      Some(v) => Ok(v.clone()),
      None if missing == OnMissing::Null => Ok(Value::Null),
      None => Err(CacheError::not_found(path)),
    }
  }

  fn resolve_fallback(&self, body: &str) -> CacheResult<Value> {
    let parts: Vec<&str> = body.split("||").collect();
    if parts.len() != 2 {
      return Err(CacheError::validation(format!(
        "fallback expression must have exactly one '||', found {} parts in '{}'",
        parts.len(),
        body
      )));
    }
    let key = parts[0].trim();
    if key.contains('*') {
      return Err(CacheError::validation(format!(
        "wildcards cannot be combined with a fallback: '{}'",
        key
      )));
    }
    match self.resolve(key, OnMissing::Fail) {
      Ok(v) => Ok(v),
      Err(CacheError::NotFound(_)) => Ok(parse_literal(parts[1])),
      Err(e) => Err(e),
    }
  }

  /// Values at every path matching a wildcard pattern, in path order.
  pub fn matching_values(&self, pattern: &Path) -> Vec<Value> {
    self
      .tree
      .glob(pattern)
      .iter()
      .filter_map(|p| self.tree.get(p).cloned())
      .collect()
  }

  /// Render a string. A string that is exactly one interpolation yields the
  /// typed value; otherwise each interpolation is substituted as text.
  pub fn render(&self, text: &str) -> CacheResult<Value> {
    if !text.contains(OPEN) {
      return Ok(Value::String(text.to_string()));
    }
    let expanded = self.expand_nested(text)?;
    let spans = flat_spans(&expanded);
    if spans.len() == 1 && spans[0] == (0, expanded.len()) {
      let body = &expanded[OPEN.len()..expanded.len() - CLOSE.len()];
      return self.resolve(body, OnMissing::Fail);
    }
    self.substitute(&expanded, &spans).map(Value::String)
  }

  /// Render a string, always as text.
  pub fn render_text(&self, text: &str) -> CacheResult<String> {
    if !text.contains(OPEN) {
      return Ok(text.to_string());
    }
    let expanded = self.expand_nested(text)?;
    let spans = flat_spans(&expanded);
    self.substitute(&expanded, &spans)
  }

  /// Render a key field into a path.
  pub fn render_path(&self, text: &str) -> CacheResult<Path> {
    Path::parse(&self.render_text(text)?)
  }

  /// Interpolate every string inside a value.
  pub fn render_value(&self, value: &Value) -> CacheResult<Value> {
    match value {
      Value::String(s) => self.render(s),
      Value::List(items) => items
        .iter()
        .map(|item| self.render_value(item))
        .collect::<CacheResult<Vec<_>>>()
        .map(Value::List),
      Value::Map(map) => {
        let mut out = std::collections::BTreeMap::new();
        for (k, v) in map {
          out.insert(k.clone(), self.render_value(v)?);
        }
        Ok(Value::Map(out))
      }
      other => Ok(other.clone()),
    }
  }

  fn substitute(&self, text: &str, spans: &[(usize, usize)]) -> CacheResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for &(start, end) in spans {
      let body = text[start + OPEN.len()..end - CLOSE.len()].trim();
      if body.contains('*') && !body.contains("||") {
        return Err(CacheError::validation(format!(
          "wildcard interpolation '{}' is not allowed inside a template",
          body
        )));
      }
      out.push_str(&text[last..start]);
      out.push_str(&self.resolve(body, OnMissing::Fail)?.to_text());
      last = end;
    }
    out.push_str(&text[last..]);
    Ok(out)
  }
}

/// Locate the first interpolation that is closed while still inside another.
fn innermost_nested(s: &str) -> Option<(usize, usize)> {
  let mut open: Vec<usize> = Vec::new();
  let mut i = 0;
  while i < s.len() {
    let rest = &s.as_bytes()[i..];
    if rest.starts_with(OPEN.as_bytes()) {
      open.push(i);
      i += OPEN.len();
    } else if rest.starts_with(CLOSE.as_bytes()) && !open.is_empty() {
      let start = open.pop()?;
      if !open.is_empty() {
        return Some((start, i + CLOSE.len()));
      }
      i += CLOSE.len();
    } else {
      i += 1;
    }
  }
  None
}

/// Byte spans of the flat interpolations in `s`, each `${{` to its `}}`.
pub(crate) fn flat_spans(s: &str) -> Vec<(usize, usize)> {
  let mut spans = Vec::new();
  let mut from = 0;
  while let Some(rel) = s[from..].find(OPEN) {
    let start = from + rel;
    match s[start + OPEN.len()..].find(CLOSE) {
      Some(rel_end) => {
        let end = start + OPEN.len() + rel_end + CLOSE.len();
        spans.push((start, end));
        from = end;
      }
      None => break,
    }
  }
  spans
}

/// Interpret a fallback default: booleans, null, numbers, quoted or bare text.
pub fn parse_literal(raw: &str) -> Value {
  let s = raw.trim();
  match s {
    "true" => return Value::Bool(true),
    "false" => return Value::Bool(false),
    "null" | "nil" => return Value::Null,
    _ => {}
  }
  if let Ok(i) = s.parse::<i64>() {
    return Value::Number(i as f64);
  }
  if let Ok(f) = s.parse::<f64>() {
    if f.is_finite() {
      return Value::Number(f);
    }
  }
  let quoted = s.len() >= 2
    && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));
  if quoted {
    return Value::String(s[1..s.len() - 1].to_string());
  }
  Value::String(s.to_string())
}
