//! Connection Registry implementation.
//!
//! Tracks which connection each user is currently reachable through.

use std::fmt;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::protocol::ServerEvent;
use crate::types::{ConnectionId, UserId};

/// Non-owning reference to a live connection.
///
/// Equality is by connection id only; two handles for the same connection
/// compare equal even though each holds its own sender clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle for the connection whose writer drains `sender`.
    pub fn new(id: ConnectionId, sender: mpsc::Sender<ServerEvent>) -> Self {
        Self { id, sender }
    }

    /// The connection this handle points at.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the connection's writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue an event for this connection without waiting.
    pub fn send(&self, event: ServerEvent) -> SendResult {
        match self.sender.try_send(event) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection_id = %self.id, "Outbound channel full, dropping event");
                SendResult::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection_id = %self.id, "Outbound channel closed, connection may have dropped");
                SendResult::ChannelClosed
            }
        }
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// Result of attempting to send an event to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Event was queued for delivery
    Sent,
    /// The channel to the recipient is full (backpressure)
    ChannelFull,
    /// The channel to the recipient is closed
    ChannelClosed,
}

impl SendResult {
    /// Whether the event was handed to the connection.
    pub fn is_sent(&self) -> bool {
        matches!(self, SendResult::Sent)
    }
}

/// Presence table mapping user ids to their bound connection.
///
/// Thread-safe; uses DashMap for concurrent access without explicit locking.
/// Every operation is a single in-memory map access and never blocks on I/O.
///
/// ## Usage
///
/// ```ignore
/// let registry = ConnectionRegistry::new();
///
/// // When a connection identifies itself:
/// let (tx, rx) = mpsc::channel(256);
/// registry.bind(user_id.clone(), ConnectionHandle::new(connection_id, tx));
///
/// // When relaying:
/// if let Some(handle) = registry.lookup(&recipient) {
///     handle.send(ServerEvent::MessageReceive(body));
/// }
///
/// // When the connection closes:
/// registry.unbind_if_current(&user_id, connection_id);
/// ```
pub struct ConnectionRegistry {
    connections: DashMap<UserId, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            connections: DashMap::new(),
        }
    }

    /// Bind a user to a connection, replacing any previous binding.
    ///
    /// Returns the handle that was displaced, if it belonged to a different
    /// connection. The displaced connection is not closed or notified here.
    #[instrument(skip(self, handle), fields(user_id = %user_id, connection_id = %handle.id()))]
    pub fn bind(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let new_id = handle.id();
        match self.connections.insert(user_id, handle) {
            Some(previous) if previous.id() != new_id => {
                debug!(previous = %previous.id(), "Replaced existing binding");
                Some(previous)
            }
            Some(_) => {
                debug!("Connection rebound to the same user");
                None
            }
            None => {
                debug!("Bound user to connection");
                None
            }
        }
    }

    /// Get the connection currently bound to a user.
    pub fn lookup(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.connections
            .get(user_id)
            .map(|entry| entry.value().clone())
    }

    /// Remove a user's binding, whatever connection it points at.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn unbind(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        let removed = self.connections.remove(user_id).map(|(_, handle)| handle);
        if removed.is_some() {
            debug!("Unbound user");
        }
        removed
    }

    /// Remove a user's binding only if it still points at `connection_id`.
    ///
    /// A connection that closes after its user already rebound elsewhere
    /// leaves the newer binding in place.
    #[instrument(skip(self), fields(user_id = %user_id, connection_id = %connection_id))]
    pub fn unbind_if_current(&self, user_id: &UserId, connection_id: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(user_id, |_, handle| handle.id() == connection_id)
            .is_some();
        if removed {
            debug!("Unbound user");
        } else {
            debug!("Binding already points elsewhere, leaving it");
        }
        removed
    }

    /// Remove every binding that points at `connection_id`.
    ///
    /// Scans the whole table. Returns the user ids that were unbound.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub fn unbind_by_handle(&self, connection_id: ConnectionId) -> Vec<UserId> {
        let mut removed = Vec::new();
        self.connections.retain(|user_id, handle| {
            if handle.id() == connection_id {
                removed.push(user_id.clone());
                false
            } else {
                true
            }
        });
        debug!(count = removed.len(), "Unbound connection");
        removed
    }

    /// Check if a user currently has a live binding.
    pub fn is_bound(&self, user_id: &UserId) -> bool {
        self.connections.contains_key(user_id)
    }

    /// Get the number of bound users.
    pub fn bound_count(&self) -> usize {
        self.connections.len()
    }

    /// List all bound user ids.
    ///
    /// Useful for debugging and monitoring.
    pub fn list_bound_users(&self) -> Vec<UserId> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// Remove all bindings whose connection has already closed.
    ///
    /// Catches connections whose disconnect cleanup never ran.
    pub fn cleanup_stale(&self) -> usize {
        let mut removed = 0;
        self.connections.retain(|user_id, handle| {
            if handle.is_closed() {
                debug!(user_id = %user_id, connection_id = %handle.id(), "Removed stale binding");
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            info!(count = removed, "Cleaned up stale bindings");
        }

        removed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("bound_count", &self.connections.len())
            .finish()
    }
}
