//! RESP command dispatch and connection-level commands

use crate::cache::{CacheError, CacheResult, Path, Value};

use super::protocol::RespValue;
use super::session::Session;
use super::{hashes, keys, lists, strings};

/// Every command name the dispatcher understands.
pub const COMMANDS: &[&str] = &[
  "PING", "ECHO", "SELECT", "COMMAND", "HELLO", "CLIENT", "QUIT", "SET", "GET", "DEL", "EXISTS",
  "INCR", "DECR", "INCRBY", "DECRBY", "MGET", "MSET", "GETSET", "SETNX", "SETEX", "STRLEN",
  "APPEND", "EXPIRE", "PEXPIRE", "PERSIST", "TTL", "PTTL", "KEYS", "TYPE", "DBSIZE", "FLUSHDB",
  "FLUSHALL", "HGET", "HSET", "HGETALL", "HDEL", "HEXISTS", "HLEN", "HKEYS", "HVALS", "HMGET",
  "HMSET", "LPUSH", "RPUSH", "LPOP", "RPOP", "LLEN", "LRANGE", "LINDEX", "LSET",
];

pub(super) type Reply = CacheResult<RespValue>;

/// Execute one command for `session`. `cmd` is upper-case.
pub async fn execute_command(session: &mut Session, cmd: &str, args: &[String]) -> RespValue {
  tracing::trace!(session = session.id(), cmd = %cmd, args = args.len(), "RESP command");
  let reply = match cmd {
    "PING" => Ok(cmd_ping(args)),
    "ECHO" => Ok(cmd_echo(args)),
    "SELECT" => cmd_select(session, args),
    "COMMAND" => Ok(cmd_command(args)),
    "HELLO" => Ok(cmd_hello(session, args)),
    "CLIENT" => Ok(cmd_client(session, args)),
    "QUIT" => Ok(RespValue::ok()),

    "SET" => strings::cmd_set(session, args).await,
    "GET" => strings::cmd_get(session, args),
    "DEL" => strings::cmd_del(session, args).await,
    "EXISTS" => strings::cmd_exists(session, args),
    "INCR" => strings::cmd_incr_by(session, "INCR", args, 1).await,
    "DECR" => strings::cmd_incr_by(session, "DECR", args, -1).await,
    "INCRBY" => strings::cmd_incr_by(session, "INCRBY", args, 1).await,
    "DECRBY" => strings::cmd_incr_by(session, "DECRBY", args, -1).await,
    "MGET" => strings::cmd_mget(session, args),
    "MSET" => strings::cmd_mset(session, args).await,
    "GETSET" => strings::cmd_getset(session, args).await,
    "SETNX" => strings::cmd_setnx(session, args).await,
    "SETEX" => strings::cmd_setex(session, args).await,
    "STRLEN" => strings::cmd_strlen(session, args),
    "APPEND" => strings::cmd_append(session, args).await,

    "EXPIRE" => keys::cmd_expire(session, "EXPIRE", args, 1000).await,
    "PEXPIRE" => keys::cmd_expire(session, "PEXPIRE", args, 1).await,
    "PERSIST" => keys::cmd_persist(session, args).await,
    "TTL" => keys::cmd_ttl(session, "TTL", args, 1000),
    "PTTL" => keys::cmd_ttl(session, "PTTL", args, 1),
    "KEYS" => keys::cmd_keys(session, args),
    "TYPE" => keys::cmd_type(session, args),
    "DBSIZE" => keys::cmd_dbsize(session),
    "FLUSHDB" | "FLUSHALL" => keys::cmd_flushdb(session).await,

    "HGET" => hashes::cmd_hget(session, args),
    "HSET" => hashes::cmd_hset(session, "HSET", args).await,
    "HMSET" => hashes::cmd_hset(session, "HMSET", args).await,
    "HGETALL" => hashes::cmd_hgetall(session, args),
    "HDEL" => hashes::cmd_hdel(session, args).await,
    "HEXISTS" => hashes::cmd_hexists(session, args),
    "HLEN" => hashes::cmd_hlen(session, args),
    "HKEYS" => hashes::cmd_hkeys(session, args),
    "HVALS" => hashes::cmd_hvals(session, args),
    "HMGET" => hashes::cmd_hmget(session, args),

    "LPUSH" => lists::cmd_push(session, "LPUSH", args, true).await,
    "RPUSH" => lists::cmd_push(session, "RPUSH", args, false).await,
    "LPOP" => lists::cmd_pop(session, "LPOP", args, true).await,
    "RPOP" => lists::cmd_pop(session, "RPOP", args, false).await,
    "LLEN" => lists::cmd_llen(session, args),
    "LRANGE" => lists::cmd_lrange(session, args),
    "LINDEX" => lists::cmd_lindex(session, args),
    "LSET" => lists::cmd_lset(session, args).await,

    _ => Ok(RespValue::Error(format!(
      "ERR unknown command '{}'",
      cmd.to_lowercase()
    ))),
  };

  reply.unwrap_or_else(|e| {
    tracing::debug!(session = session.id(), cmd = %cmd, error = %e, "RESP command failed");
    RespValue::from(&e)
  })
}

// ============================================================================
// Shared argument helpers
// ============================================================================

/// Integer argument, or `None` when it does not parse.
pub(super) fn int_arg(raw: &str) -> Option<i64> {
  raw.parse().ok()
}

/// A read where a missing key is an answer, not an error.
pub(super) fn lookup(result: CacheResult<Value>) -> CacheResult<Option<Value>> {
  match result {
    Ok(value) => Ok(Some(value)),
    Err(CacheError::NotFound(_)) => Ok(None),
    Err(e) => Err(e),
  }
}

/// Internal form of a client key (`a:b` becomes `a/b`).
pub(super) fn key_path(raw: &str) -> CacheResult<Path> {
  Path::parse(raw)
}

/// Path of a hash field or list index under `key`. Fields are single
/// segments, so separators are refused.
pub(super) fn field_path(key: &Path, field: &str) -> CacheResult<Path> {
  if field.contains([':', '/']) {
    return Err(CacheError::validation(format!(
      "field '{}' must not contain ':' or '/'",
      field
    )));
  }
  Path::parse(&format!("{}/{}", key, field))
}

// ============================================================================
// Connection commands
// ============================================================================

fn cmd_ping(args: &[String]) -> RespValue {
  match args.first() {
    None => RespValue::pong(),
    Some(msg) => RespValue::bulk(msg),
  }
}

fn cmd_echo(args: &[String]) -> RespValue {
  match args {
    [msg] => RespValue::bulk(msg),
    _ => RespValue::wrong_args("echo"),
  }
}

fn cmd_select(session: &mut Session, args: &[String]) -> Reply {
  let [index] = args else {
    return Ok(RespValue::wrong_args("select"));
  };
  let Ok(index) = index.parse::<u64>() else {
    return Ok(RespValue::not_integer());
  };
  session.select(index)?;
  Ok(RespValue::ok())
}

fn cmd_command(args: &[String]) -> RespValue {
  let subcommand = args.first().map(|s| s.to_uppercase());
  match subcommand.as_deref() {
    None | Some("DOCS") => RespValue::array(vec![]),
    Some("COUNT") => RespValue::integer(COMMANDS.len() as i64),
    Some(other) => RespValue::Error(format!(
      "ERR unknown subcommand '{}'",
      other.to_lowercase()
    )),
  }
}

fn cmd_hello(session: &Session, args: &[String]) -> RespValue {
  if let Some(version) = args.first() {
    if version != "2" {
      return RespValue::error("NOPROTO unsupported protocol version");
    }
  }
  RespValue::array(vec![
    RespValue::bulk("server"),
    RespValue::bulk("mapcache"),
    RespValue::bulk("version"),
    RespValue::bulk(env!("CARGO_PKG_VERSION")),
    RespValue::bulk("proto"),
    RespValue::integer(2),
    RespValue::bulk("id"),
    RespValue::integer(session.id() as i64),
    RespValue::bulk("mode"),
    RespValue::bulk("standalone"),
    RespValue::bulk("role"),
    RespValue::bulk("master"),
    RespValue::bulk("modules"),
    RespValue::array(vec![]),
  ])
}

fn cmd_client(session: &Session, args: &[String]) -> RespValue {
  let subcommand = args.first().map(|s| s.to_uppercase());
  match subcommand.as_deref() {
    Some("SETINFO") | Some("SETNAME") => RespValue::ok(),
    Some("GETNAME") => RespValue::null_bulk(),
    Some("ID") => RespValue::integer(session.id() as i64),
    _ => RespValue::error("ERR unknown CLIENT subcommand"),
  }
}
