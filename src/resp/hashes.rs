//! Hash commands over a mapping stored at the key

use std::collections::BTreeMap;

use crate::cache::{CacheError, CacheResult, PatchOp, Value};

use super::commands::{field_path, key_path, lookup, Reply};
use super::protocol::RespValue;
use super::session::Session;

type Fields = BTreeMap<String, Value>;

/// A missing key reads as an empty hash; anything but a mapping is the
/// wrong type.
fn hash_of(key: &str, value: Option<Value>) -> CacheResult<Fields> {
  match value {
    None => Ok(Fields::new()),
    Some(Value::Map(map)) => Ok(map),
    Some(other) => Err(CacheError::type_mismatch(format!(
      "{} holds a {}, not a hash",
      key,
      other.type_name()
    ))),
  }
}

fn read_hash(session: &Session, key: &str) -> CacheResult<Fields> {
  let cache = session.cache()?;
  hash_of(key, lookup(cache.get(key))?)
}

pub(super) fn cmd_hget(session: &Session, args: &[String]) -> Reply {
  let [key, field] = args else {
    return Ok(RespValue::wrong_args("hget"));
  };
  let fields = read_hash(session, key)?;
  Ok(match fields.get(field.as_str()) {
    Some(value) => RespValue::from_value(value),
    None => RespValue::null_bulk(),
  })
}

/// HSET returns the number of fields added; HMSET answers OK.
pub(super) async fn cmd_hset(session: &Session, name: &str, args: &[String]) -> Reply {
  let [key, pairs @ ..] = args else {
    return Ok(RespValue::wrong_args(name));
  };
  if pairs.is_empty() || pairs.len() % 2 != 0 {
    return Ok(RespValue::wrong_args(name));
  }
  let path = key_path(key)?;

  let cache = session.cache()?;
  let mut guard = session.lock(&cache, name).await?;
  let mut existing = hash_of(key, lookup(guard.get(key))?)?;

  let mut added = 0;
  let mut ops = Vec::with_capacity(pairs.len() / 2);
  for pair in pairs.chunks(2) {
    let target = field_path(&path, &pair[0])?;
    if existing.insert(pair[0].clone(), Value::Null).is_none() {
      added += 1;
    }
    ops.push(PatchOp::Replace {
      key: target.to_string(),
      value: Value::from(pair[1].as_str()),
    });
  }
  guard.patch(&ops)?;

  Ok(if name == "HMSET" {
    RespValue::ok()
  } else {
    RespValue::integer(added)
  })
}

pub(super) fn cmd_hgetall(session: &Session, args: &[String]) -> Reply {
  let [key] = args else {
    return Ok(RespValue::wrong_args("hgetall"));
  };
  let fields = read_hash(session, key)?;
  let mut items = Vec::with_capacity(fields.len() * 2);
  for (field, value) in &fields {
    items.push(RespValue::bulk(field));
    items.push(RespValue::from_value(value));
  }
  Ok(RespValue::array(items))
}

/// Remove fields; the key goes away with its last field.
pub(super) async fn cmd_hdel(session: &Session, args: &[String]) -> Reply {
  let [key, names @ ..] = args else {
    return Ok(RespValue::wrong_args("hdel"));
  };
  if names.is_empty() {
    return Ok(RespValue::wrong_args("hdel"));
  }
  let path = key_path(key)?;

  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "HDEL").await?;
  let fields = hash_of(key, lookup(guard.get(key))?)?;

  let mut targets = Vec::new();
  for name in names {
    if fields.contains_key(name.as_str()) {
      targets.push(field_path(&path, name)?.to_string());
    }
  }
  targets.sort();
  targets.dedup();
  let removed = guard.delete(&targets)?;
  if removed > 0 && removed == fields.len() {
    guard.delete(&[path.to_string()])?;
  }
  Ok(RespValue::integer(removed as i64))
}

pub(super) fn cmd_hexists(session: &Session, args: &[String]) -> Reply {
  let [key, field] = args else {
    return Ok(RespValue::wrong_args("hexists"));
  };
  let fields = read_hash(session, key)?;
  Ok(RespValue::integer(i64::from(
    fields.contains_key(field.as_str()),
  )))
}

pub(super) fn cmd_hlen(session: &Session, args: &[String]) -> Reply {
  let [key] = args else {
    return Ok(RespValue::wrong_args("hlen"));
  };
  let fields = read_hash(session, key)?;
  Ok(RespValue::integer(fields.len() as i64))
}

pub(super) fn cmd_hkeys(session: &Session, args: &[String]) -> Reply {
  let [key] = args else {
    return Ok(RespValue::wrong_args("hkeys"));
  };
  let fields = read_hash(session, key)?;
  Ok(RespValue::array(
    fields.keys().map(|k| RespValue::bulk(k)).collect(),
  ))
}

pub(super) fn cmd_hvals(session: &Session, args: &[String]) -> Reply {
  let [key] = args else {
    return Ok(RespValue::wrong_args("hvals"));
  };
  let fields = read_hash(session, key)?;
  Ok(RespValue::array(
    fields.values().map(RespValue::from_value).collect(),
  ))
}

pub(super) fn cmd_hmget(session: &Session, args: &[String]) -> Reply {
  let [key, names @ ..] = args else {
    return Ok(RespValue::wrong_args("hmget"));
  };
  if names.is_empty() {
    return Ok(RespValue::wrong_args("hmget"));
  }
  let fields = read_hash(session, key)?;
  Ok(RespValue::array(
    names
      .iter()
      .map(|name| match fields.get(name.as_str()) {
        Some(value) => RespValue::from_value(value),
        None => RespValue::null_bulk(),
      })
      .collect(),
  ))
}
