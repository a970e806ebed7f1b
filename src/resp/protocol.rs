//! RESP2 parser and encoder

use std::io::{self, Write};

use crate::cache::{format_number, CacheError, Value};

pub const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
pub const NOT_INTEGER: &str = "ERR value is not an integer or out of range";
pub const SYNTAX: &str = "ERR syntax error";

/// RESP protocol value types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
  /// Simple string (+OK\r\n)
  SimpleString(String),
  /// Error (-ERR message\r\n)
  Error(String),
  /// Integer (:123\r\n)
  Integer(i64),
  /// Bulk string ($5\r\nhello\r\n)
  BulkString(Option<String>),
  /// Array (*2\r\n...)
  Array(Option<Vec<RespValue>>),
}

impl RespValue {
  pub fn ok() -> Self {
    RespValue::SimpleString("OK".to_string())
  }

  pub fn pong() -> Self {
    RespValue::SimpleString("PONG".to_string())
  }

  pub fn null_bulk() -> Self {
    RespValue::BulkString(None)
  }

  pub fn null_array() -> Self {
    RespValue::Array(None)
  }

  pub fn error(msg: &str) -> Self {
    RespValue::Error(msg.to_string())
  }

  pub fn bulk(s: &str) -> Self {
    RespValue::BulkString(Some(s.to_string()))
  }

  pub fn integer(i: i64) -> Self {
    RespValue::Integer(i)
  }

  pub fn array(items: Vec<RespValue>) -> Self {
    RespValue::Array(Some(items))
  }

  pub fn wrong_args(cmd: &str) -> Self {
    RespValue::Error(format!(
      "ERR wrong number of arguments for '{}' command",
      cmd.to_lowercase()
    ))
  }

  pub fn wrong_type() -> Self {
    RespValue::error(WRONG_TYPE)
  }

  pub fn not_integer() -> Self {
    RespValue::error(NOT_INTEGER)
  }

  /// Reply for a stored value: strings verbatim, numbers in wire form,
  /// booleans as integers, containers as compact JSON.
  pub fn from_value(value: &Value) -> Self {
    match value {
      Value::Null => RespValue::null_bulk(),
      Value::Bool(b) => RespValue::integer(i64::from(*b)),
      Value::Number(n) => RespValue::BulkString(Some(format_number(*n))),
      Value::String(s) => RespValue::bulk(s),
      other => RespValue::BulkString(Some(other.to_text())),
    }
  }

  /// Encode to RESP wire format
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = Vec::new();
    // Writes into a Vec cannot fail.
    let _ = self.write_to(&mut buf);
    buf
  }

  fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
    match self {
      RespValue::SimpleString(s) => {
        write!(w, "+{}\r\n", s)?;
      }
      RespValue::Error(e) => {
        write!(w, "-{}\r\n", e)?;
      }
      RespValue::Integer(i) => {
        write!(w, ":{}\r\n", i)?;
      }
      RespValue::BulkString(None) => {
        write!(w, "$-1\r\n")?;
      }
      RespValue::BulkString(Some(s)) => {
        write!(w, "${}\r\n{}\r\n", s.len(), s)?;
      }
      RespValue::Array(None) => {
        write!(w, "*-1\r\n")?;
      }
      RespValue::Array(Some(items)) => {
        write!(w, "*{}\r\n", items.len())?;
        for item in items {
          item.write_to(w)?;
        }
      }
    }
    Ok(())
  }

  /// Extract string value
  pub fn as_str(&self) -> Option<&str> {
    match self {
      RespValue::SimpleString(s) | RespValue::BulkString(Some(s)) => Some(s),
      _ => None,
    }
  }

  /// Extract integer value
  pub fn as_i64(&self) -> Option<i64> {
    match self {
      RespValue::Integer(i) => Some(*i),
      RespValue::SimpleString(s) | RespValue::BulkString(Some(s)) => s.parse().ok(),
      _ => None,
    }
  }

  /// Extract array elements
  pub fn as_array(&self) -> Option<&[RespValue]> {
    match self {
      RespValue::Array(Some(arr)) => Some(arr),
      _ => None,
    }
  }

  pub fn is_error(&self) -> bool {
    matches!(self, RespValue::Error(_))
  }
}

impl From<&CacheError> for RespValue {
  fn from(e: &CacheError) -> Self {
    match e {
      CacheError::TypeMismatch(_) => RespValue::wrong_type(),
      CacheError::NotFound(_) => RespValue::error("ERR no such key"),
      CacheError::Canceled => RespValue::error("ERR timeout waiting for cache"),
      other => RespValue::Error(format!("ERR {}", other)),
    }
  }
}

impl From<CacheError> for RespValue {
  fn from(e: CacheError) -> Self {
    RespValue::from(&e)
  }
}

/// RESP parse error
#[derive(Debug, Clone)]
pub enum RespError {
  /// Incomplete data, need more bytes
  Incomplete,
  /// Invalid protocol format
  Invalid(String),
}

impl std::fmt::Display for RespError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RespError::Incomplete => write!(f, "incomplete data"),
      RespError::Invalid(msg) => write!(f, "invalid RESP: {}", msg),
    }
  }
}

impl std::error::Error for RespError {}

/// Incremental RESP parser. Feed it bytes as they arrive, then pull complete
/// values with `parse` until it returns `Ok(None)`.
pub struct RespParser {
  buffer: Vec<u8>,
  pos: usize,
}

impl Default for RespParser {
  fn default() -> Self {
    Self::new()
  }
}

impl RespParser {
  pub fn new() -> Self {
    Self {
      buffer: Vec::new(),
      pos: 0,
    }
  }

  /// Add data to the parse buffer
  pub fn feed(&mut self, data: &[u8]) {
    self.buffer.extend_from_slice(data);
  }

  /// Try to parse the next value from the buffer
  pub fn parse(&mut self) -> Result<Option<RespValue>, RespError> {
    if self.pos >= self.buffer.len() {
      return Ok(None);
    }

    let start_pos = self.pos;
    match self.parse_value() {
      Ok(value) => {
        self.buffer.drain(..self.pos);
        self.pos = 0;
        Ok(Some(value))
      }
      Err(RespError::Incomplete) => {
        self.pos = start_pos;
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }

  fn parse_value(&mut self) -> Result<RespValue, RespError> {
    let byte = self.read_byte()?;

    match byte {
      b'+' => Ok(RespValue::SimpleString(self.read_line()?)),
      b'-' => Ok(RespValue::Error(self.read_line()?)),
      b':' => self.parse_integer(),
      b'$' => self.parse_bulk_string(),
      b'*' => self.parse_array(),
      _ => {
        // Inline command: put the byte back and read the whole line.
        self.pos -= 1;
        self.parse_inline_command()
      }
    }
  }

  fn parse_integer(&mut self) -> Result<RespValue, RespError> {
    let line = self.read_line()?;
    let i = line
      .parse()
      .map_err(|_| RespError::Invalid(format!("invalid integer: {}", line)))?;
    Ok(RespValue::Integer(i))
  }

  fn parse_bulk_string(&mut self) -> Result<RespValue, RespError> {
    let len = self.read_length("bulk string")?;
    let Some(len) = len else {
      return Ok(RespValue::BulkString(None));
    };

    if self.pos + len + 2 > self.buffer.len() {
      return Err(RespError::Incomplete);
    }

    let data = &self.buffer[self.pos..self.pos + len];
    let s = String::from_utf8_lossy(data).to_string();
    self.pos += len;

    if &self.buffer[self.pos..self.pos + 2] != b"\r\n" {
      return Err(RespError::Invalid(
        "missing CRLF after bulk string".to_string(),
      ));
    }
    self.pos += 2;

    Ok(RespValue::BulkString(Some(s)))
  }

  fn parse_array(&mut self) -> Result<RespValue, RespError> {
    let len = self.read_length("array")?;
    let Some(len) = len else {
      return Ok(RespValue::Array(None));
    };

    let mut items = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
      items.push(self.parse_value()?);
    }

    Ok(RespValue::Array(Some(items)))
  }

  /// Length prefix; negative lengths encode null.
  fn read_length(&mut self, what: &str) -> Result<Option<usize>, RespError> {
    let line = self.read_line()?;
    let len: i64 = line
      .parse()
      .map_err(|_| RespError::Invalid(format!("invalid {} length: {}", what, line)))?;
    Ok(usize::try_from(len).ok())
  }

  fn parse_inline_command(&mut self) -> Result<RespValue, RespError> {
    let line = self.read_line()?;
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.is_empty() {
      return Err(RespError::Invalid("empty command".to_string()));
    }

    let items: Vec<RespValue> = parts.into_iter().map(RespValue::bulk).collect();

    Ok(RespValue::Array(Some(items)))
  }

  fn read_byte(&mut self) -> Result<u8, RespError> {
    if self.pos >= self.buffer.len() {
      return Err(RespError::Incomplete);
    }
    let byte = self.buffer[self.pos];
    self.pos += 1;
    Ok(byte)
  }

  fn read_line(&mut self) -> Result<String, RespError> {
    let start = self.pos;

    loop {
      if self.pos + 1 >= self.buffer.len() {
        return Err(RespError::Incomplete);
      }

      if self.buffer[self.pos] == b'\r' && self.buffer[self.pos + 1] == b'\n' {
        let line = &self.buffer[start..self.pos];
        let s = String::from_utf8_lossy(line).to_string();
        self.pos += 2;
        return Ok(s);
      }

      self.pos += 1;
    }
  }
}

/// Parse a single RESP value from bytes
pub fn parse_resp(data: &[u8]) -> Result<RespValue, RespError> {
  let mut parser = RespParser::new();
  parser.feed(data);
  parser.parse()?.ok_or(RespError::Incomplete)
}

/// Split a request array into an upper-cased command name and its arguments.
pub fn extract_command(value: &RespValue) -> Option<(String, Vec<String>)> {
  let arr = value.as_array()?;
  let (first, rest) = arr.split_first()?;

  let cmd = first.as_str()?.to_uppercase();
  let args: Vec<String> = rest
    .iter()
    .filter_map(|v| match v {
      RespValue::Integer(i) => Some(i.to_string()),
      other => other.as_str().map(String::from),
    })
    .collect();

  Some((cmd, args))
}
