//! Cache kernel
//!
//! Provides hierarchical key-value caches with:
//! - `a/b/c` paths into nested mappings and lists
//! - an expression language with `${{...}}` interpolation
//! - typed commands and triggers that fire on value changes
//! - per-key and per-cache TTLs
//! - JSON snapshots
//!
//! Transports depend only on this module: they fetch a [`Cache`] from the
//! [`Registry`], read through it directly, and take a [`WriteGuard`] for
//! anything that mutates.

mod command;
mod error;
mod exec;
pub mod expr;
pub mod interp;
mod patch;
mod path;
mod registry;
mod snapshot;
mod stats;
mod store;
mod timer;
mod tree;
mod trigger;
mod value;

pub use command::{Command, Keys};
pub use error::{CacheError, CacheResult};
pub use patch::PatchOp;
pub use path::{Path, SEPARATOR, WILDCARD};
pub use registry::{Registry, RegistryOptions, DEFAULT_CACHE};
pub use snapshot::{Snapshot, SnapshotManager};
pub use stats::CacheStats;
pub use store::{
  check_ttl, Cache, CacheSettings, CacheState, Cancellation, WriteGuard,
  DEFAULT_MAX_CASCADE_DEPTH,
};
pub use tree::Tree;
pub use trigger::{Trigger, TriggerRecord, TriggerStore};
pub use value::{format_number, Value};
