//! String commands: SET, GET, INCR and friends

use std::time::Duration;

use crate::cache::{check_ttl, format_number, PatchOp, Value};

use super::commands::{int_arg, key_path, lookup, Reply};
use super::keys::expire_after_write;
use super::protocol::{RespValue, SYNTAX};
use super::session::Session;

pub(super) async fn cmd_set(session: &Session, args: &[String]) -> Reply {
  let [key, value, options @ ..] = args else {
    return Ok(RespValue::wrong_args("set"));
  };

  let mut ttl: Option<Duration> = None;
  let mut nx = false;
  let mut xx = false;
  let mut keep_ttl = false;

  let mut i = 0;
  while i < options.len() {
    let option = options[i].to_uppercase();
    match option.as_str() {
      "EX" | "PX" => {
        let Some(raw) = options.get(i + 1) else {
          return Ok(RespValue::error(SYNTAX));
        };
        let unit = if option == "EX" { 1000 } else { 1 };
        match expire_millis(raw, unit) {
          Some(ms) => ttl = Some(Duration::from_millis(ms)),
          None => return Ok(RespValue::error("ERR invalid expire time in 'set' command")),
        }
        i += 2;
      }
      "NX" => {
        nx = true;
        i += 1;
      }
      "XX" => {
        xx = true;
        i += 1;
      }
      "KEEPTTL" => {
        keep_ttl = true;
        i += 1;
      }
      _ => return Ok(RespValue::Error(format!("ERR unknown option '{}'", options[i]))),
    }
  }
  if (nx && xx) || (keep_ttl && ttl.is_some()) {
    return Ok(RespValue::error(SYNTAX));
  }

  let path = key_path(key)?;
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "SET").await?;
  let exists = guard.contains(key);
  if (nx && exists) || (xx && !exists) {
    return Ok(RespValue::null_bulk());
  }
  guard.replace(key, value.as_str())?;
  expire_after_write(&mut guard, &path, ttl, keep_ttl)?;
  Ok(RespValue::ok())
}

pub(super) fn cmd_get(session: &Session, args: &[String]) -> Reply {
  let [key] = args else {
    return Ok(RespValue::wrong_args("get"));
  };
  let cache = session.cache()?;
  Ok(match lookup(cache.get(key))? {
    Some(value) => RespValue::from_value(&value),
    None => RespValue::null_bulk(),
  })
}

pub(super) async fn cmd_del(session: &Session, args: &[String]) -> Reply {
  if args.is_empty() {
    return Ok(RespValue::wrong_args("del"));
  }
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "DEL").await?;
  let removed = guard.delete(args)?;
  Ok(RespValue::integer(removed as i64))
}

pub(super) fn cmd_exists(session: &Session, args: &[String]) -> Reply {
  if args.is_empty() {
    return Ok(RespValue::wrong_args("exists"));
  }
  let cache = session.cache()?;
  let found = cache
    .batch_get(args)
    .into_iter()
    .filter(|r| r.is_ok())
    .count();
  Ok(RespValue::integer(found as i64))
}

/// INCR, DECR, INCRBY and DECRBY. A missing key starts at 0; strings that
/// hold an integer are accepted and the result is stored as a number.
pub(super) async fn cmd_incr_by(session: &Session, name: &str, args: &[String], sign: i64) -> Reply {
  let (key, delta) = match (name, args) {
    ("INCR" | "DECR", [key]) => (key, 1),
    ("INCRBY" | "DECRBY", [key, delta]) => match int_arg(delta) {
      Some(delta) => (key, delta),
      None => return Ok(RespValue::not_integer()),
    },
    _ => return Ok(RespValue::wrong_args(name)),
  };
  let Some(delta) = delta.checked_mul(sign) else {
    return Ok(RespValue::not_integer());
  };

  let cache = session.cache()?;
  let mut guard = session.lock(&cache, name).await?;
  let current = match lookup(guard.get(key))? {
    None => 0,
    Some(Value::Map(_) | Value::List(_)) => return Ok(RespValue::wrong_type()),
    Some(value) => match integer_of(&value) {
      Some(n) => n,
      None => return Ok(RespValue::not_integer()),
    },
  };
  let Some(next) = current.checked_add(delta) else {
    return Ok(RespValue::not_integer());
  };
  guard.replace(key, Value::from(next))?;
  Ok(RespValue::integer(next))
}

fn integer_of(value: &Value) -> Option<i64> {
  match value {
    Value::Number(_) => value.as_i64(),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

pub(super) fn cmd_mget(session: &Session, args: &[String]) -> Reply {
  if args.is_empty() {
    return Ok(RespValue::wrong_args("mget"));
  }
  let cache = session.cache()?;
  let values = cache
    .batch_get(args)
    .into_iter()
    .map(|r| match r {
      Ok(value) => RespValue::from_value(&value),
      Err(_) => RespValue::null_bulk(),
    })
    .collect();
  Ok(RespValue::array(values))
}

/// Set every pair in one atomic patch.
pub(super) async fn cmd_mset(session: &Session, args: &[String]) -> Reply {
  if args.is_empty() || args.len() % 2 != 0 {
    return Ok(RespValue::wrong_args("mset"));
  }
  let mut paths = Vec::with_capacity(args.len() / 2);
  let mut ops = Vec::with_capacity(args.len() / 2);
  for pair in args.chunks(2) {
    paths.push(key_path(&pair[0])?);
    ops.push(PatchOp::Replace {
      key: pair[0].clone(),
      value: Value::from(pair[1].as_str()),
    });
  }

  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "MSET").await?;
  guard.patch(&ops)?;
  for path in &paths {
    expire_after_write(&mut guard, path, None, false)?;
  }
  Ok(RespValue::ok())
}

pub(super) async fn cmd_getset(session: &Session, args: &[String]) -> Reply {
  let [key, value] = args else {
    return Ok(RespValue::wrong_args("getset"));
  };
  let path = key_path(key)?;
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "GETSET").await?;
  let old = lookup(guard.get(key))?;
  guard.replace(key, value.as_str())?;
  expire_after_write(&mut guard, &path, None, false)?;
  Ok(match old {
    Some(value) => RespValue::from_value(&value),
    None => RespValue::null_bulk(),
  })
}

pub(super) async fn cmd_setnx(session: &Session, args: &[String]) -> Reply {
  let [key, value] = args else {
    return Ok(RespValue::wrong_args("setnx"));
  };
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "SETNX").await?;
  if guard.contains(key) {
    return Ok(RespValue::integer(0));
  }
  guard.replace(key, value.as_str())?;
  Ok(RespValue::integer(1))
}

pub(super) async fn cmd_setex(session: &Session, args: &[String]) -> Reply {
  let [key, seconds, value] = args else {
    return Ok(RespValue::wrong_args("setex"));
  };
  let Some(ms) = expire_millis(seconds, 1000) else {
    return Ok(RespValue::error("ERR invalid expire time in 'setex' command"));
  };
  let path = key_path(key)?;
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "SETEX").await?;
  guard.replace(key, value.as_str())?;
  expire_after_write(&mut guard, &path, Some(Duration::from_millis(ms)), false)?;
  Ok(RespValue::ok())
}

pub(super) fn cmd_strlen(session: &Session, args: &[String]) -> Reply {
  let [key] = args else {
    return Ok(RespValue::wrong_args("strlen"));
  };
  let cache = session.cache()?;
  Ok(match lookup(cache.get(key))? {
    None => RespValue::integer(0),
    Some(Value::String(s)) => RespValue::integer(s.len() as i64),
    Some(Value::Number(n)) => RespValue::integer(format_number(n).len() as i64),
    Some(_) => RespValue::wrong_type(),
  })
}

/// Concatenate onto the key's text, creating it when missing. Returns the
/// new length.
pub(super) async fn cmd_append(session: &Session, args: &[String]) -> Reply {
  let [key, suffix] = args else {
    return Ok(RespValue::wrong_args("append"));
  };
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "APPEND").await?;
  let mut text = match lookup(guard.get(key))? {
    None => String::new(),
    Some(Value::String(s)) => s,
    Some(Value::Number(n)) => format_number(n),
    Some(_) => return Ok(RespValue::wrong_type()),
  };
  text.push_str(suffix);
  let len = text.len();
  guard.replace(key, text)?;
  Ok(RespValue::integer(len as i64))
}

/// Positive expire time in milliseconds, `unit` being the milliseconds per
/// client unit. Times too far out to schedule are invalid.
fn expire_millis(raw: &str, unit: u64) -> Option<u64> {
  let n: u64 = raw.parse().ok()?;
  if n == 0 {
    return None;
  }
  n.checked_mul(unit).filter(|ms| check_ttl(Duration::from_millis(*ms)).is_ok())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_expire_millis() {
    assert_eq!(expire_millis("2", 1000), Some(2000));
    assert_eq!(expire_millis("15", 1), Some(15));
    assert_eq!(expire_millis("0", 1000), None);
    assert_eq!(expire_millis("-1", 1000), None);
    assert_eq!(expire_millis("x", 1), None);
    assert_eq!(expire_millis("18446744073709551", 1000), None);
    assert_eq!(expire_millis("9223372036854775000", 1), None);
  }

  #[test]
  fn test_integer_of() {
    assert_eq!(integer_of(&Value::from("42")), Some(42));
    assert_eq!(integer_of(&Value::from("4.2")), None);
    assert_eq!(integer_of(&Value::Number(7.0)), Some(7));
    assert_eq!(integer_of(&Value::Number(7.5)), None);
    assert_eq!(integer_of(&Value::Bool(true)), None);
  }
}
