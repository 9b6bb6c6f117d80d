//! Connection lifecycle management.
//!
//! Every transport connection walks a small state machine:
//!
//! ```text
//!   accept ──> Unbound ──add-user──> Bound ──add-user──> Bound
//!                 │                    │
//!                 └──── disconnect ────┴──> Closed
//! ```
//!
//! The [`LifecycleManager`] is the only component that writes to the
//! [`ConnectionRegistry`]. Cleanup on disconnect is keyed by connection id,
//! so a connection closing late never removes a newer binding made by a
//! reconnect of the same user.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::ServerEvent;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::types::{ConnectionId, UserId};

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Lifecycle tuning.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    /// Send a `superseded` event to a connection whose binding was taken over
    pub notify_superseded: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            notify_superseded: true,
        }
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no identity yet
    Unbound,
    /// Bound to the given user (the most recent `add-user`)
    Bound(UserId),
    /// Transport closed; terminal
    Closed,
}

/// Per-connection state owned by the transport task.
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    state: ConnectionState,
    /// Every user id this connection has bound, in bind order
    bound_users: Vec<UserId>,
}

impl Connection {
    /// This connection's id.
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// The user this connection most recently bound, if still open.
    pub fn user_id(&self) -> Option<&UserId> {
        match &self.state {
            ConnectionState::Bound(user_id) => Some(user_id),
            _ => None,
        }
    }

    /// A handle to this connection, as stored in the registry.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }
}

/// Accepts connections, binds identities and cleans up on disconnect.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    registry: Arc<ConnectionRegistry>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    /// Create a manager writing to `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, config: LifecycleConfig) -> Self {
        Self { registry, config }
    }

    /// The registry this manager maintains.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Accept a new transport connection.
    ///
    /// Returns the connection state and the receiving end of its outbound
    /// queue, which the transport's writer drains. The connection starts
    /// unbound and is not in the registry yet.
    pub fn accept(&self) -> (Connection, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let connection = Connection {
            handle: ConnectionHandle::new(ConnectionId::new(), tx),
            state: ConnectionState::Unbound,
            bound_users: Vec::new(),
        };
        debug!(connection_id = %connection.id(), "Accepted connection");
        (connection, rx)
    }

    /// Bind `connection` to `user_id`.
    ///
    /// Last bind wins: another connection previously bound to the same user
    /// loses the binding (and is told so when `notify_superseded` is set).
    /// Rebinding this connection to a different user keeps the old user's
    /// entry until this connection disconnects.
    ///
    /// Returns false if the connection is already closed.
    pub fn bind(&self, connection: &mut Connection, user_id: UserId) -> bool {
        if connection.is_closed() {
            warn!(connection_id = %connection.id(), user_id = %user_id, "Ignoring bind on closed connection");
            return false;
        }

        let displaced = self
            .registry
            .bind(user_id.clone(), connection.handle.clone());

        if let Some(previous) = displaced {
            info!(
                user_id = %user_id,
                previous = %previous.id(),
                connection_id = %connection.id(),
                "User binding superseded by a new connection"
            );
            if self.config.notify_superseded {
                // Best effort; the old connection may already be gone.
                let _ = previous.send(ServerEvent::Superseded(user_id.clone()));
            }
        }

        if !connection.bound_users.contains(&user_id) {
            connection.bound_users.push(user_id.clone());
        }
        info!(user_id = %user_id, connection_id = %connection.id(), "Connection bound");
        connection.state = ConnectionState::Bound(user_id);
        true
    }

    /// Close `connection` and remove every binding that still points at it.
    ///
    /// Returns the number of registry entries removed. Calling this twice is
    /// a no-op.
    pub fn disconnect(&self, connection: &mut Connection) -> usize {
        if connection.is_closed() {
            return 0;
        }

        let removed = match connection.bound_users.as_slice() {
            [] => 0,
            [user_id] => usize::from(self.registry.unbind_if_current(user_id, connection.id())),
            // Rebound across users: scan for whatever still points here
            _ => self.registry.unbind_by_handle(connection.id()).len(),
        };

        info!(
            connection_id = %connection.id(),
            user_id = ?connection.user_id().map(UserId::as_str),
            removed,
            "Connection closed"
        );

        connection.state = ConnectionState::Closed;
        connection.bound_users.clear();
        removed
    }

    /// Drop bindings whose connection closed without running cleanup.
    pub fn sweep_stale(&self) -> usize {
        self.registry.cleanup_stale()
    }
}
