//! Transport layer: TCP listener and per-connection request loop.

pub mod connection;
pub mod server;

pub use connection::handle_connection;
pub use server::{ConfigError, ServerConfig, announce, bind, serve, serve_listener};
