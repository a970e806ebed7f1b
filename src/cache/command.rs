//! Typed commands accepted by `execute` and stored in triggers

use serde::{Deserialize, Serialize};

use super::value::Value;

/// A command, tagged on the wire by `"type"`.
///
/// ```json
/// {"type": "IF", "condition": "${{task/1/countdown}} == 0",
///  "if_true": {"type": "REPLACE", "key": "task/1/status", "value": "complete"},
///  "if_false": {"type": "NOOP"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Command {
  Noop,
  Create {
    key: String,
    value: Value,
  },
  Replace {
    key: String,
    value: Value,
  },
  Delete {
    #[serde(alias = "keys")]
    key: Keys,
  },
  Inc {
    key: String,
    #[serde(default = "one")]
    value: f64,
  },
  Dec {
    key: String,
    #[serde(default = "one")]
    value: f64,
  },
  If {
    condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    if_true: Option<Box<Command>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    if_false: Option<Box<Command>>,
  },
  Commands {
    commands: Vec<Command>,
  },
  Print {
    message: String,
  },
  Backup {
    filename: String,
  },
  Restore {
    filename: String,
  },
  Get {
    key: String,
  },
  Return {
    key: Value,
  },
  For {
    loop_expr: String,
    commands: Vec<Command>,
  },
}

fn one() -> f64 {
  1.0
}

/// One key or a list of keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keys {
  One(String),
  Many(Vec<String>),
}

impl Keys {
  pub fn iter(&self) -> impl Iterator<Item = &String> {
    match self {
      Keys::One(k) => std::slice::from_ref(k).iter(),
      Keys::Many(ks) => ks.iter(),
    }
  }
}

impl Command {
  pub fn name(&self) -> &'static str {
    match self {
      Command::Noop => "NOOP",
      Command::Create { .. } => "CREATE",
      Command::Replace { .. } => "REPLACE",
      Command::Delete { .. } => "DELETE",
      Command::Inc { .. } => "INC",
      Command::Dec { .. } => "DEC",
      Command::If { .. } => "IF",
      Command::Commands { .. } => "COMMANDS",
      Command::Print { .. } => "PRINT",
      Command::Backup { .. } => "BACKUP",
      Command::Restore { .. } => "RESTORE",
      Command::Get { .. } => "GET",
      Command::Return { .. } => "RETURN",
      Command::For { .. } => "FOR",
    }
  }

  pub fn replace(key: impl Into<String>, value: impl Into<Value>) -> Self {
    Command::Replace {
      key: key.into(),
      value: value.into(),
    }
  }

  pub fn inc(key: impl Into<String>, value: f64) -> Self {
    Command::Inc {
      key: key.into(),
      value,
    }
  }

  pub fn when(condition: impl Into<String>, if_true: Command, if_false: Command) -> Self {
    Command::If {
      condition: condition.into(),
      if_true: Some(Box::new(if_true)),
      if_false: Some(Box::new(if_false)),
    }
  }
}
