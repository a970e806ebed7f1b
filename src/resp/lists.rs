//! List commands over a list stored at the key

use crate::cache::{CacheError, CacheResult, Value};

use super::commands::{field_path, int_arg, key_path, lookup, Reply};
use super::protocol::RespValue;
use super::session::Session;

fn list_of(key: &str, value: Option<Value>) -> CacheResult<Vec<Value>> {
  match value {
    None => Ok(Vec::new()),
    Some(Value::List(items)) => Ok(items),
    Some(other) => Err(CacheError::type_mismatch(format!(
      "{} holds a {}, not a list",
      key,
      other.type_name()
    ))),
  }
}

fn read_list(session: &Session, key: &str) -> CacheResult<Vec<Value>> {
  let cache = session.cache()?;
  list_of(key, lookup(cache.get(key))?)
}

/// Resolve a possibly negative index against `len`.
fn resolve_index(len: usize, index: i64) -> Option<usize> {
  let len = len as i64;
  let index = if index < 0 { len + index } else { index };
  (0..len).contains(&index).then_some(index as usize)
}

/// Inclusive LRANGE bounds clamped to the list, or `None` when empty.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
  let len = len as i64;
  let start = if start < 0 { (len + start).max(0) } else { start };
  let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
  if start > stop || start >= len {
    None
  } else {
    Some((start as usize, stop as usize))
  }
}

/// LPUSH (`front`) and RPUSH. Values are pushed one by one, so LPUSH leaves
/// the last argument at the head.
pub(super) async fn cmd_push(session: &Session, name: &str, args: &[String], front: bool) -> Reply {
  let [key, values @ ..] = args else {
    return Ok(RespValue::wrong_args(name));
  };
  if values.is_empty() {
    return Ok(RespValue::wrong_args(name));
  }
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, name).await?;
  let mut items = list_of(key, lookup(guard.get(key))?)?;
  for value in values {
    if front {
      items.insert(0, Value::from(value.as_str()));
    } else {
      items.push(Value::from(value.as_str()));
    }
  }
  let len = items.len();
  guard.replace(key, Value::List(items))?;
  Ok(RespValue::integer(len as i64))
}

/// LPOP (`front`) and RPOP with an optional count. Popping the last item
/// removes the key.
pub(super) async fn cmd_pop(session: &Session, name: &str, args: &[String], front: bool) -> Reply {
  let (key, count) = match args {
    [key] => (key, None),
    [key, count] => match int_arg(count).and_then(|n| usize::try_from(n).ok()) {
      Some(n) => (key, Some(n)),
      None => return Ok(RespValue::error("ERR value is out of range, must be positive")),
    },
    _ => return Ok(RespValue::wrong_args(name)),
  };

  let cache = session.cache()?;
  let mut guard = session.lock(&cache, name).await?;
  let Some(current) = lookup(guard.get(key))? else {
    return Ok(match count {
      Some(_) => RespValue::null_array(),
      None => RespValue::null_bulk(),
    });
  };
  let mut items = list_of(key, Some(current))?;

  let take = count.unwrap_or(1).min(items.len());
  let popped: Vec<Value> = if front {
    items.drain(..take).collect()
  } else {
    let mut tail = items.split_off(items.len() - take);
    tail.reverse();
    tail
  };

  if items.is_empty() {
    guard.delete(&[key.clone()])?;
  } else if take > 0 {
    guard.replace(key, Value::List(items))?;
  }

  Ok(match count {
    Some(_) => RespValue::array(popped.iter().map(RespValue::from_value).collect()),
    None => popped
      .first()
      .map(RespValue::from_value)
      .unwrap_or_else(RespValue::null_bulk),
  })
}

pub(super) fn cmd_llen(session: &Session, args: &[String]) -> Reply {
  let [key] = args else {
    return Ok(RespValue::wrong_args("llen"));
  };
  Ok(RespValue::integer(read_list(session, key)?.len() as i64))
}

pub(super) fn cmd_lrange(session: &Session, args: &[String]) -> Reply {
  let [key, start, stop] = args else {
    return Ok(RespValue::wrong_args("lrange"));
  };
  let (Some(start), Some(stop)) = (int_arg(start), int_arg(stop)) else {
    return Ok(RespValue::not_integer());
  };
  let items = read_list(session, key)?;
  Ok(match resolve_range(items.len(), start, stop) {
    Some((from, to)) => RespValue::array(items[from..=to].iter().map(RespValue::from_value).collect()),
    None => RespValue::array(vec![]),
  })
}

pub(super) fn cmd_lindex(session: &Session, args: &[String]) -> Reply {
  let [key, index] = args else {
    return Ok(RespValue::wrong_args("lindex"));
  };
  let Some(index) = int_arg(index) else {
    return Ok(RespValue::not_integer());
  };
  let items = read_list(session, key)?;
  Ok(match resolve_index(items.len(), index) {
    Some(i) => RespValue::from_value(&items[i]),
    None => RespValue::null_bulk(),
  })
}

pub(super) async fn cmd_lset(session: &Session, args: &[String]) -> Reply {
  let [key, index, value] = args else {
    return Ok(RespValue::wrong_args("lset"));
  };
  let Some(index) = int_arg(index) else {
    return Ok(RespValue::not_integer());
  };
  let path = key_path(key)?;
  let cache = session.cache()?;
  let mut guard = session.lock(&cache, "LSET").await?;
  let Some(current) = lookup(guard.get(key))? else {
    return Ok(RespValue::error("ERR no such key"));
  };
  let items = list_of(key, Some(current))?;
  let Some(i) = resolve_index(items.len(), index) else {
    return Ok(RespValue::error("ERR index out of range"));
  };
  let target = field_path(&path, &i.to_string())?;
  guard.replace(&target.to_string(), value.as_str())?;
  Ok(RespValue::ok())
}
