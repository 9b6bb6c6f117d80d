//! Parley Server
//!
//! HTTP and WebSocket front end for the Parley relay: presence binding and
//! live direct messages over `/ws`, message history over `/api/messages`,
//! backed by a libSQL message store.

pub mod config;
pub mod db;
pub mod messages;
pub mod server;
pub mod telemetry;

pub use config::{ConfigError, ServerConfig};
