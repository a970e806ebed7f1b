//! Condition and arithmetic expressions used by IF commands
//!
//! ```text
//! or      := and ('||' and)*
//! and     := compare ('&&' compare)*
//! compare := sum (('=='|'!='|'<'|'<='|'>'|'>=') sum)?
//! sum     := product (('+'|'-') product)*
//! product := unary (('*'|'/'|'%') unary)*
//! unary   := ('-'|'!') unary | primary
//! primary := number | string | true | false | null | '${{' body '}}'
//!          | '(' or ')' | ('any'|'all') '(' or ')'
//! ```

use std::cmp::Ordering;
use std::mem::discriminant;

use super::error::{CacheError, CacheResult};
use super::interp::{OnMissing, Scope};
use super::path::Path;
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  And,
  Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Neg,
  Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
  Any,
  All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Literal(Value),
  /// A flat `${{body}}` reference.
  Interp(String),
  Unary(UnaryOp, Box<Expr>),
  Binary(BinaryOp, Box<Expr>, Box<Expr>),
  Quantified(Quantifier, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Number(f64),
  Str(String),
  Ident(String),
  Interp(String),
  LParen,
  RParen,
  Op(&'static str),
}

fn tokenize(src: &str) -> CacheResult<Vec<Token>> {
  let chars: Vec<char> = src.chars().collect();
  let mut tokens = Vec::new();
  let mut i = 0;

  while i < chars.len() {
    let c = chars[i];
    if c.is_whitespace() {
      i += 1;
      continue;
    }

    if c == '$' && chars.get(i + 1) == Some(&'{') && chars.get(i + 2) == Some(&'{') {
      let start = i + 3;
      let mut j = start;
      while j + 1 < chars.len() && !(chars[j] == '}' && chars[j + 1] == '}') {
        j += 1;
      }
      if j + 1 >= chars.len() {
        return Err(CacheError::Parse(format!(
          "unterminated interpolation in '{}'",
          src
        )));
      }
      tokens.push(Token::Interp(chars[start..j].iter().collect()));
      i = j + 2;
      continue;
    }

    if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
      let start = i;
      while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
        i += 1;
      }
      if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        i += 1;
        if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
          i += 1;
        }
        while i < chars.len() && chars[i].is_ascii_digit() {
          i += 1;
        }
      }
      let text: String = chars[start..i].iter().collect();
      let n = text
        .parse::<f64>()
        .map_err(|_| CacheError::Parse(format!("invalid number '{}'", text)))?;
      tokens.push(Token::Number(n));
      continue;
    }

    if c == '"' || c == '\'' {
      let quote = c;
      let mut s = String::new();
      i += 1;
      loop {
        match chars.get(i) {
          None => {
            return Err(CacheError::Parse(format!(
              "unterminated string in '{}'",
              src
            )))
          }
          Some(&ch) if ch == quote => {
            i += 1;
            break;
          }
          Some('\\') => {
            let escaped = chars.get(i + 1).copied().ok_or_else(|| {
              CacheError::Parse(format!("dangling escape in '{}'", src))
            })?;
            s.push(match escaped {
              'n' => '\n',
              't' => '\t',
              other => other,
            });
            i += 2;
          }
          Some(&ch) => {
            s.push(ch);
            i += 1;
          }
        }
      }
      tokens.push(Token::Str(s));
      continue;
    }

    if c.is_alphabetic() || c == '_' {
      let start = i;
      while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
      }
      tokens.push(Token::Ident(chars[start..i].iter().collect()));
      continue;
    }

    let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
    let op = match two.as_str() {
      "==" => Some("=="),
      "!=" => Some("!="),
      "<=" => Some("<="),
      ">=" => Some(">="),
      "&&" => Some("&&"),
      "||" => Some("||"),
      _ => None,
    };
    if let Some(op) = op {
      tokens.push(Token::Op(op));
      i += 2;
      continue;
    }

    let single = match c {
      '(' => Token::LParen,
      ')' => Token::RParen,
      '+' => Token::Op("+"),
      '-' => Token::Op("-"),
      '*' => Token::Op("*"),
      '/' => Token::Op("/"),
      '%' => Token::Op("%"),
      '<' => Token::Op("<"),
      '>' => Token::Op(">"),
      '!' => Token::Op("!"),
      other => {
        return Err(CacheError::Parse(format!(
          "unexpected character '{}' in '{}'",
          other, src
        )))
      }
    };
    tokens.push(single);
    i += 1;
  }

  Ok(tokens)
}

struct Parser {
  tokens: Vec<Token>,
  pos: usize,
}

impl Parser {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn next(&mut self) -> Option<Token> {
    let t = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    t
  }

  fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
    match self.peek() {
      Some(Token::Op(op)) if ops.contains(op) => {
        let op = *op;
        self.pos += 1;
        Some(op)
      }
      _ => None,
    }
  }

  fn expect_rparen(&mut self) -> CacheResult<()> {
    match self.next() {
      Some(Token::RParen) => Ok(()),
      other => Err(CacheError::Parse(format!("expected ')', found {:?}", other))),
    }
  }

  fn or(&mut self) -> CacheResult<Expr> {
    let mut left = self.and()?;
    while self.eat_op(&["||"]).is_some() {
      let right = self.and()?;
      left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
    }
    Ok(left)
  }

  fn and(&mut self) -> CacheResult<Expr> {
    let mut left = self.compare()?;
    while self.eat_op(&["&&"]).is_some() {
      let right = self.compare()?;
      left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
    }
    Ok(left)
  }

  fn compare(&mut self) -> CacheResult<Expr> {
    let left = self.sum()?;
    let op = match self.eat_op(&["==", "!=", "<", "<=", ">", ">="]) {
      Some("==") => BinaryOp::Eq,
      Some("!=") => BinaryOp::Ne,
      Some("<") => BinaryOp::Lt,
      Some("<=") => BinaryOp::Le,
      Some(">") => BinaryOp::Gt,
      Some(">=") => BinaryOp::Ge,
      _ => return Ok(left),
    };
    let right = self.sum()?;
    Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
  }

  fn sum(&mut self) -> CacheResult<Expr> {
    let mut left = self.product()?;
    while let Some(op) = self.eat_op(&["+", "-"]) {
      let right = self.product()?;
      let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
      left = Expr::Binary(op, Box::new(left), Box::new(right));
    }
    Ok(left)
  }

  fn product(&mut self) -> CacheResult<Expr> {
    let mut left = self.unary()?;
    while let Some(op) = self.eat_op(&["*", "/", "%"]) {
      let right = self.unary()?;
      let op = match op {
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        _ => BinaryOp::Rem,
      };
      left = Expr::Binary(op, Box::new(left), Box::new(right));
    }
    Ok(left)
  }

  fn unary(&mut self) -> CacheResult<Expr> {
    if self.eat_op(&["-"]).is_some() {
      return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
    }
    if self.eat_op(&["!"]).is_some() {
      return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
    }
    self.primary()
  }

  fn primary(&mut self) -> CacheResult<Expr> {
    match self.next() {
      Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
      Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
      Some(Token::Interp(body)) => Ok(Expr::Interp(body)),
      Some(Token::LParen) => {
        let inner = self.or()?;
        self.expect_rparen()?;
        Ok(inner)
      }
      Some(Token::Ident(word)) => match word.as_str() {
        "true" => Ok(Expr::Literal(Value::Bool(true))),
        "false" => Ok(Expr::Literal(Value::Bool(false))),
        "null" | "nil" => Ok(Expr::Literal(Value::Null)),
        "any" | "all" => {
          match self.next() {
            Some(Token::LParen) => {}
            other => {
              return Err(CacheError::Parse(format!(
                "expected '(' after {}, found {:?}",
                word, other
              )))
            }
          }
          let inner = self.or()?;
          self.expect_rparen()?;
          let q = if word == "any" {
            Quantifier::Any
          } else {
            Quantifier::All
          };
          Ok(Expr::Quantified(q, Box::new(inner)))
        }
        other => Err(CacheError::Parse(format!("unknown identifier '{}'", other))),
      },
      Some(other) => Err(CacheError::Parse(format!("unexpected token {:?}", other))),
      None => Err(CacheError::Parse("unexpected end of expression".to_string())),
    }
  }
}

/// Parse an expression whose nested interpolations were already expanded.
pub fn parse(src: &str) -> CacheResult<Expr> {
  let tokens = tokenize(src)?;
  if tokens.is_empty() {
    return Err(CacheError::Parse("empty expression".to_string()));
  }
  let mut parser = Parser { tokens, pos: 0 };
  let expr = parser.or()?;
  if let Some(extra) = parser.peek() {
    return Err(CacheError::Parse(format!(
      "unexpected trailing token {:?}",
      extra
    )));
  }
  Ok(expr)
}

/// Expand, parse and evaluate an expression. Read-only.
pub fn evaluate(src: &str, scope: &Scope<'_>) -> CacheResult<Value> {
  let expanded = scope.expand_nested(src)?;
  let expr = parse(&expanded)?;
  Evaluator { scope, bound: None }.eval(&expr)
}

/// Evaluate a condition that must produce a boolean.
pub fn evaluate_condition(src: &str, scope: &Scope<'_>) -> CacheResult<bool> {
  match evaluate(src, scope)? {
    Value::Bool(b) => Ok(b),
    other => Err(CacheError::type_mismatch(format!(
      "condition '{}' produced a {}, expected a boolean",
      src,
      other.type_name()
    ))),
  }
}

struct Evaluator<'s, 'a> {
  scope: &'s Scope<'a>,
  /// Interpolation body pinned to one value while expanding any()/all().
  bound: Option<(&'s str, &'s Value)>,
}

impl<'s, 'a> Evaluator<'s, 'a> {
  fn eval(&self, expr: &'s Expr) -> CacheResult<Value> {
    match expr {
      Expr::Literal(v) => Ok(v.clone()),
      Expr::Interp(body) => {
        if let Some((b, v)) = self.bound {
          if b == body.as_str() {
            return Ok(v.clone());
          }
        }
        self.scope.resolve(body, OnMissing::Null)
      }
      Expr::Unary(UnaryOp::Neg, inner) => match self.eval(inner)? {
        Value::Number(n) => Ok(Value::Number(-n)),
        other => Err(CacheError::type_mismatch(format!(
          "cannot negate a {}",
          other.type_name()
        ))),
      },
      Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!self.boolean(inner)?)),
      Expr::Binary(BinaryOp::And, l, r) => Ok(Value::Bool(self.boolean(l)? && self.boolean(r)?)),
      Expr::Binary(BinaryOp::Or, l, r) => Ok(Value::Bool(self.boolean(l)? || self.boolean(r)?)),
      Expr::Binary(op, l, r) => {
        let left = self.eval(l)?;
        let right = self.eval(r)?;
        binary(*op, &left, &right)
      }
      Expr::Quantified(q, inner) => self.quantified(*q, inner),
    }
  }

  fn boolean(&self, expr: &'s Expr) -> CacheResult<bool> {
    match self.eval(expr)? {
      Value::Bool(b) => Ok(b),
      other => Err(CacheError::type_mismatch(format!(
        "expected a boolean operand, found a {}",
        other.type_name()
      ))),
    }
  }

  fn quantified(&self, q: Quantifier, inner: &'s Expr) -> CacheResult<Value> {
    let body = first_wildcard(inner).ok_or_else(|| {
      CacheError::validation("any()/all() needs a wildcard interpolation such as ${{a/*/b}}")
    })?;
    let pattern = Path::parse(body.trim())?;
    let values = self.scope.matching_values(&pattern);
    if values.is_empty() {
      return Ok(Value::Bool(false));
    }
    for value in &values {
      let nested = Evaluator {
        scope: self.scope,
        bound: Some((body, value)),
      };
      let hit = nested.boolean(inner)?;
      match q {
        Quantifier::Any if hit => return Ok(Value::Bool(true)),
        Quantifier::All if !hit => return Ok(Value::Bool(false)),
        _ => {}
      }
    }
    Ok(Value::Bool(q == Quantifier::All))
  }
}

fn first_wildcard(expr: &Expr) -> Option<&str> {
  match expr {
    Expr::Interp(body) if body.contains('*') => Some(body.as_str()),
    Expr::Unary(_, inner) | Expr::Quantified(_, inner) => first_wildcard(inner),
    Expr::Binary(_, l, r) => first_wildcard(l).or_else(|| first_wildcard(r)),
    _ => None,
  }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> CacheResult<Value> {
  match op {
    BinaryOp::Eq => Ok(Value::Bool(equals(left, right)?)),
    BinaryOp::Ne => Ok(Value::Bool(!equals(left, right)?)),
    BinaryOp::Lt => Ok(Value::Bool(order(left, right)? == Ordering::Less)),
    BinaryOp::Le => Ok(Value::Bool(order(left, right)? != Ordering::Greater)),
    BinaryOp::Gt => Ok(Value::Bool(order(left, right)? == Ordering::Greater)),
    BinaryOp::Ge => Ok(Value::Bool(order(left, right)? != Ordering::Less)),
    BinaryOp::Add => match (left, right) {
      (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
      _ => arithmetic(op, left, right),
    },
    _ => arithmetic(op, left, right),
  }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> CacheResult<Value> {
  let (a, b) = match (left, right) {
    (Value::Number(a), Value::Number(b)) => (*a, *b),
    _ => {
      return Err(CacheError::type_mismatch(format!(
        "arithmetic on {} and {}",
        left.type_name(),
        right.type_name()
      )))
    }
  };
  let result = match op {
    BinaryOp::Add => a + b,
    BinaryOp::Sub => a - b,
    BinaryOp::Mul => a * b,
    BinaryOp::Div if b == 0.0 => return Err(CacheError::Arithmetic("division by zero".into())),
    BinaryOp::Div => a / b,
    BinaryOp::Rem if b == 0.0 => return Err(CacheError::Arithmetic("modulo by zero".into())),
    BinaryOp::Rem => a % b,
    other => {
      return Err(CacheError::Parse(format!(
        "{:?} is not an arithmetic operator",
        other
      )))
    }
  };
  if !result.is_finite() {
    return Err(CacheError::Arithmetic(format!(
      "result of {} {:?} {} is not finite",
      a, op, b
    )));
  }
  Ok(Value::Number(result))
}

/// Null equals only null; otherwise both sides must have the same kind.
fn equals(left: &Value, right: &Value) -> CacheResult<bool> {
  if left.is_null() || right.is_null() {
    return Ok(left.is_null() && right.is_null());
  }
  if discriminant(left) != discriminant(right) {
    return Err(CacheError::type_mismatch(format!(
      "cannot compare {} with {}",
      left.type_name(),
      right.type_name()
    )));
  }
  Ok(left == right)
}

fn order(left: &Value, right: &Value) -> CacheResult<Ordering> {
  match (left, right) {
    (Value::Number(a), Value::Number(b)) => a
      .partial_cmp(b)
      .ok_or_else(|| CacheError::Arithmetic("NaN is not ordered".into())),
    (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
    _ => Err(CacheError::type_mismatch(format!(
      "cannot order {} against {}",
      left.type_name(),
      right.type_name()
    ))),
  }
}
