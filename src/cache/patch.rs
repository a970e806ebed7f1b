//! Patch operations

use serde::{Deserialize, Serialize};

use super::error::CacheResult;
use super::path::Path;
use super::store::Edit;
use super::value::Value;

/// One step of a Patch. Keys are plain paths; no interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum PatchOp {
  Create {
    key: String,
    value: Value,
  },
  Replace {
    key: String,
    value: Value,
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
  Delete {
    key: String,
  },
  Append {
    key: String,
    value: Value,
  },
  Resize {
    key: String,
    #[serde(alias = "value")]
    size: usize,
  },
}

fn one() -> f64 {
  1.0
}

impl PatchOp {
  pub fn key(&self) -> &str {
    match self {
      PatchOp::Create { key, .. }
      | PatchOp::Replace { key, .. }
      | PatchOp::Inc { key, .. }
      | PatchOp::Dec { key, .. }
      | PatchOp::Delete { key }
      | PatchOp::Append { key, .. }
      | PatchOp::Resize { key, .. } => key,
    }
  }

  pub(crate) fn apply(&self, edit: &mut Edit<'_>) -> CacheResult<()> {
    let path = Path::parse(self.key())?;
    match self {
      PatchOp::Create { value, .. } => edit.create(&path, value.clone()),
      PatchOp::Replace { value, .. } => edit.write(&path, value.clone()),
      PatchOp::Inc { value, .. } => edit.add(&path, *value).map(|_| ()),
      PatchOp::Dec { value, .. } => edit.add(&path, -*value).map(|_| ()),
      PatchOp::Delete { .. } => {
        edit.remove_matching(&path);
        Ok(())
      }
      PatchOp::Append { value, .. } => edit.append(&path, value.clone()).map(|_| ()),
      PatchOp::Resize { size, .. } => edit.resize(&path, *size),
    }
  }
}
