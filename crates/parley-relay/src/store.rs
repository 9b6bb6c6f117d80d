//! Message Store collaborator interface.
//!
//! The relay only needs a narrow durable append plus the queries used to
//! recover messages that missed live delivery. The server crate backs this
//! with libSQL; tests use in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{MessageEvent, UserId};

/// A message as recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Store-assigned id (time-sortable)
    pub id: String,
    /// Sending user, if known
    pub sender: Option<UserId>,
    /// Recipient user
    pub recipient: UserId,
    /// Message body
    pub body: String,
    /// Whether the message was handed to a live connection
    pub delivered: bool,
    /// When the message was stored
    pub created_at: DateTime<Utc>,
}

/// Durable message storage consumed by the relay.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Append a message. Returns the stored record.
    async fn persist(&self, event: &MessageEvent) -> Result<StoredMessage, StoreError>;

    /// Record that a stored message reached a live connection.
    async fn mark_delivered(&self, message_id: &str) -> Result<(), StoreError>;

    /// Messages addressed to `user_id` that were never delivered live,
    /// oldest first.
    async fn fetch_undelivered(&self, user_id: &UserId) -> Result<Vec<StoredMessage>, StoreError>;

    /// All messages exchanged between two users in either direction,
    /// oldest first.
    async fn fetch_conversation(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}
