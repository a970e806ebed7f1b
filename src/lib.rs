// Cache kernel (always compiled)
pub mod cache;

// Transports (only compiled with server feature)
#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod resp;
#[cfg(feature = "server")]
pub mod server;
