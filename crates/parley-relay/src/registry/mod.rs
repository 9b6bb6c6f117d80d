//! Connection Registry for live message relay.
//!
//! This module provides the presence table: a thread-safe map from user id to
//! the single live connection currently bound to that user.
//!
//! ## Architecture
//!
//! Each connection owns an outbound channel. When it binds a user id, a
//! [`ConnectionHandle`] (connection id plus a clone of the channel sender) is
//! stored under that id. Relaying looks the handle up and queues an event on
//! the channel; the connection's writer task drains it to the socket.
//!
//! ```text
//!  Connection (alice) <-> ConnectionRegistry <-> Connection (bob)
//!          |                      |                     |
//!          v                      v                     v
//!    mpsc::Sender       DashMap<UserId,          mpsc::Sender
//!                       ConnectionHandle>
//! ```
//!
//! The handle never owns the connection: dropping every handle leaves the
//! socket open, and closing the socket turns every handle stale.

mod connection_registry;

pub use connection_registry::{ConnectionHandle, ConnectionRegistry, SendResult};
