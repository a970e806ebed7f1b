mod config;
mod daemon;
mod frontend;

pub use config::{
  AuthSection, CacheSection, LoggingSection, PortsSection, ServerConfig, ServerSection,
  SnapshotSection,
};
pub use daemon::Daemon;
pub use frontend::Frontend;
