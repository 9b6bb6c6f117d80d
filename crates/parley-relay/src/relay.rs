//! Relay Engine: store-and-forward with best-effort live delivery.
//!
//! Each message is first appended to the [`MessageStore`] (bounded by a
//! timeout), then handed to the recipient's live connection if one is bound.
//! Live delivery is attempted once and never retried; anything that misses
//! it stays recoverable from the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::RelayError;
use crate::protocol::ServerEvent;
use crate::registry::{ConnectionRegistry, SendResult};
use crate::store::{MessageStore, StoredMessage};
use crate::types::{ConnectionId, MessageEvent};

/// Default upper bound on any single message store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// What happened to the live half of a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the recipient's connection
    Delivered(ConnectionId),
    /// Recipient has no bound connection
    Offline,
    /// Recipient was bound but the connection could not take the event
    Dropped {
        /// Connection the event was aimed at
        connection_id: ConnectionId,
        /// Why the hand-off failed
        reason: SendResult,
    },
}

/// Result of relaying one message. Never an error: failures are recorded
/// here and logged.
#[derive(Debug)]
pub struct RelayOutcome {
    /// The stored record, or why persisting failed
    pub stored: Result<StoredMessage, RelayError>,
    /// Live delivery result
    pub delivery: Delivery,
}

impl RelayOutcome {
    /// Whether the message reached a live connection.
    pub fn is_delivered(&self) -> bool {
        matches!(self.delivery, Delivery::Delivered(_))
    }

    /// Whether the message was durably stored.
    pub fn is_persisted(&self) -> bool {
        self.stored.is_ok()
    }
}

/// Relays direct messages between users.
///
/// Reads the [`ConnectionRegistry`] but never writes to it; stale bindings
/// are left for the lifecycle manager to clean up.
#[derive(Clone)]
pub struct RelayEngine {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
    store_timeout: Duration,
}

impl RelayEngine {
    /// Create a relay engine using the default store timeout.
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            registry,
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Override the timeout applied to each store call.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// The store this engine persists to.
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Persist `event` and attempt a single live delivery.
    ///
    /// A store failure or timeout does not prevent the live attempt.
    #[instrument(skip(self, event), fields(recipient = %event.recipient))]
    pub async fn relay(&self, event: MessageEvent) -> RelayOutcome {
        let mut stored = self.persist(&event).await;
        let delivery = self.deliver(&event);

        if let (Delivery::Delivered(_), Ok(message)) = (&delivery, &mut stored) {
            let marked = self.mark_delivered(&message.id).await;
            match marked {
                Ok(()) => message.delivered = true,
                Err(e) => warn!(message_id = %message.id, error = %e, "Failed to mark message delivered"),
            }
        }

        RelayOutcome { stored, delivery }
    }

    async fn persist(&self, event: &MessageEvent) -> Result<StoredMessage, RelayError> {
        match timeout(self.store_timeout, self.store.persist(event)).await {
            Ok(Ok(message)) => {
                debug!(message_id = %message.id, "Message persisted");
                Ok(message)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to persist message, continuing with live relay");
                Err(e.into())
            }
            Err(_) => {
                warn!(timeout = ?self.store_timeout, "Message store timed out, continuing with live relay");
                Err(RelayError::StoreTimeout(self.store_timeout))
            }
        }
    }

    fn deliver(&self, event: &MessageEvent) -> Delivery {
        let Some(handle) = self.registry.lookup(&event.recipient) else {
            debug!("Recipient offline, left in store");
            return Delivery::Offline;
        };

        match handle.send(ServerEvent::MessageReceive(event.payload.clone())) {
            SendResult::Sent => {
                debug!(connection_id = %handle.id(), "Message delivered live");
                Delivery::Delivered(handle.id())
            }
            reason => {
                debug!(connection_id = %handle.id(), ?reason, "Live delivery dropped");
                Delivery::Dropped {
                    connection_id: handle.id(),
                    reason,
                }
            }
        }
    }

    async fn mark_delivered(&self, message_id: &str) -> Result<(), RelayError> {
        match timeout(self.store_timeout, self.store.mark_delivered(message_id)).await {
            Ok(result) => result.map_err(RelayError::from),
            Err(_) => Err(RelayError::StoreTimeout(self.store_timeout)),
        }
    }
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("registry", &self.registry)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}
