//! Redis-compatible front-end
//!
//! Speaks RESP2 over TCP. Keys in colon form (`user:1:name`) address the
//! same paths as `user/1/name` over HTTP; hashes are mappings and lists are
//! lists stored at the key.

mod commands;
mod hashes;
mod keys;
mod lists;
mod protocol;
mod server;
mod session;
mod strings;

pub use commands::{execute_command, COMMANDS};
pub use protocol::{extract_command, parse_resp, RespError, RespParser, RespValue};
pub use server::RespServer;
pub use session::{Session, COMMAND_TIMEOUT};
