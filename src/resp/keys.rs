//! Keyspace commands: expiration, KEYS, TYPE, DBSIZE and FLUSHDB
//!
//! Expiration belongs to top-level keys, so `EXPIRE user:1 10` puts the TTL
//! on `user`, and `TTL user:1` reports it.

use chrono::Utc;
use regex::Regex;
use std::time::Duration;

use crate::cache::{CacheResult, Path, Value, WriteGuard};

use super::commands::{int_arg, key_path, lookup, Reply};
use super::protocol::RespValue;
use super::session::Session;

/// TTL bookkeeping after a write to `path`: install `ttl` when given,
/// otherwise drop an existing TTL unless `keep` is set. Writes below the top
/// level never clear the parent's TTL.
pub(super) fn expire_after_write(
  guard: &mut WriteGuard<'_>,
  path: &Path,
  ttl: Option<Duration>,
  keep: bool,
) -> CacheResult<()> {
  match ttl {
    Some(ttl) => guard.set_key_ttl(path.top(), ttl),
    None if !keep && path.is_top_level() => guard.clear_key_ttl(path.top()).map(|_| ()),
    None => Ok(()),
  }
}

/// EXPIRE (`unit` 1000) and PEXPIRE (`unit` 1). A non-positive time deletes
/// the key.
pub(super) async fn cmd_expire(session: &Session, name: &str, args: &[String], unit: i64) -> Reply {
  let [key, amount] = args else {
    return Ok(RespValue::wrong_args(name));
  };
  let Some(ms) = int_arg(amount).and_then(|n| n.checked_mul(unit)) else {
    return Ok(RespValue::not_integer());
  };
  let path = key_path(key)?;
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, name).await?;
  if !guard.contains(key) {
    return Ok(RespValue::integer(0));
  }
  if ms <= 0 {
    guard.delete(&[path.top().to_string()])?;
  } else {
    guard.set_key_ttl(path.top(), Duration::from_millis(ms as u64))?;
  }
  Ok(RespValue::integer(1))
}

pub(super) async fn cmd_persist(session: &Session, args: &[String]) -> Reply {
  let [key] = args else {
    return Ok(RespValue::wrong_args("persist"));
  };
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "PERSIST").await?;
  if !guard.contains(key) {
    return Ok(RespValue::integer(0));
  }
  let cleared = guard.clear_key_ttl(key)?;
  Ok(RespValue::integer(i64::from(cleared)))
}

/// TTL (`unit` 1000) and PTTL (`unit` 1): -2 for a missing key, -1 when no
/// TTL is set.
pub(super) fn cmd_ttl(session: &Session, name: &str, args: &[String], unit: u128) -> Reply {
  let [key] = args else {
    return Ok(RespValue::wrong_args(name));
  };
  let cache = session.cache()?;
  if !cache.exists(key) {
    return Ok(RespValue::integer(-2));
  }
  Ok(match cache.key_ttl(key)? {
    None => RespValue::integer(-1),
    Some(left) => RespValue::integer(((left.as_millis() + unit / 2) / unit) as i64),
  })
}

/// Glob over the key tree, one pattern segment per path level. `:` and `/`
/// both separate segments; matches are returned in colon form.
pub(super) fn cmd_keys(session: &Session, args: &[String]) -> Reply {
  let [pattern] = args else {
    return Ok(RespValue::wrong_args("keys"));
  };
  let segments = match pattern
    .replace(':', "/")
    .split('/')
    .map(glob_to_regex)
    .collect::<Result<Vec<_>, _>>()
  {
    Ok(segments) => segments,
    Err(e) => return Ok(RespValue::Error(format!("ERR invalid pattern: {}", e))),
  };

  let view = session.cache()?.view();
  let mut found = Vec::new();
  for key in view.keys(Utc::now()) {
    if !segments[0].is_match(&key) {
      continue;
    }
    if segments.len() == 1 {
      found.push(key);
    } else if let Some(value) = view.tree().get(&Path::parse(&key)?) {
      collect(value, &segments[1..], &key, &mut found);
    }
  }
  Ok(RespValue::array(
    found.iter().map(|k| RespValue::bulk(k)).collect(),
  ))
}

fn collect(value: &Value, segments: &[Regex], prefix: &str, found: &mut Vec<String>) {
  let Some((first, rest)) = segments.split_first() else {
    return;
  };
  let children: Vec<(String, &Value)> = match value {
    Value::Map(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
    Value::List(items) => items
      .iter()
      .enumerate()
      .map(|(i, v)| (i.to_string(), v))
      .collect(),
    _ => return,
  };
  for (name, child) in children {
    if !first.is_match(&name) {
      continue;
    }
    let key = format!("{}:{}", prefix, name);
    if rest.is_empty() {
      found.push(key);
    } else {
      collect(child, rest, &key, found);
    }
  }
}

/// Convert a glob (`*`, `?`, `[abc]`, `[^a-z]`, `\x`) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
  let mut regex_str = String::with_capacity(pattern.len() * 2);
  regex_str.push('^');

  let mut chars = pattern.chars().peekable();
  while let Some(c) = chars.next() {
    match c {
      '*' => regex_str.push_str(".*"),
      '?' => regex_str.push('.'),
      '\\' => {
        if let Some(next) = chars.next() {
          regex_str.push_str(&regex::escape(&next.to_string()));
        }
      }
      '[' => {
        regex_str.push('[');
        if matches!(chars.peek(), Some('^') | Some('!')) {
          chars.next();
          regex_str.push('^');
        }
        for inner in chars.by_ref() {
          if inner == ']' {
            break;
          }
          if matches!(inner, '\\' | '[' | '&' | '~') {
            regex_str.push('\\');
          }
          regex_str.push(inner);
        }
        regex_str.push(']');
      }
      _ => regex_str.push_str(&regex::escape(&c.to_string())),
    }
  }

  regex_str.push('$');
  Regex::new(&regex_str)
}

pub(super) fn cmd_type(session: &Session, args: &[String]) -> Reply {
  let [key] = args else {
    return Ok(RespValue::wrong_args("type"));
  };
  let cache = session.cache()?;
  let kind = match lookup(cache.get(key))? {
    None => "none",
    Some(Value::Map(_)) => "hash",
    Some(Value::List(_)) => "list",
    Some(_) => "string",
  };
  Ok(RespValue::SimpleString(kind.to_string()))
}

pub(super) fn cmd_dbsize(session: &Session) -> Reply {
  Ok(RespValue::integer(session.cache()?.len() as i64))
}

pub(super) async fn cmd_flushdb(session: &Session) -> Reply {
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "FLUSHDB").await?;
  let removed = guard.flush()?;
  tracing::info!(cache = %cache.name(), keys = removed, "Cache flushed over RESP");
  Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_glob_to_regex() {
    let re = glob_to_regex("user*").unwrap();
    assert!(re.is_match("user"));
    assert!(re.is_match("users"));
    assert!(!re.is_match("a-user"));

    let re = glob_to_regex("h?llo").unwrap();
    assert!(re.is_match("hello"));
    assert!(!re.is_match("heello"));

    let re = glob_to_regex("h[ae]llo").unwrap();
    assert!(re.is_match("hallo"));
    assert!(!re.is_match("hillo"));

    let re = glob_to_regex("h[^e]llo").unwrap();
    assert!(re.is_match("hallo"));
    assert!(!re.is_match("hello"));

    let re = glob_to_regex("a.b").unwrap();
    assert!(re.is_match("a.b"));
    assert!(!re.is_match("axb"));

    let re = glob_to_regex(r"star\*").unwrap();
    assert!(re.is_match("star*"));
    assert!(!re.is_match("stars"));
  }
}
