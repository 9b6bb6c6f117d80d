//! Shared identifier and event types.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Opaque, stable identifier of a registered user.
///
/// Issued by the external auth service; this crate never generates one.
/// On the wire it may arrive as a JSON string or number, and is always kept
/// as its string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user id, rejecting blank values.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == id.len() {
            Some(Self(id))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawUserId {
            Text(String),
            Number(serde_json::Number),
        }

        let raw = match RawUserId::deserialize(deserializer)? {
            RawUserId::Text(text) => text,
            RawUserId::Number(number) => number.to_string(),
        };
        UserId::new(raw).ok_or_else(|| serde::de::Error::custom("user id must not be blank"))
    }
}

/// Identity of one live transport connection.
///
/// Unique per accepted connection, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh connection id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A direct message on its way through the relay.
///
/// Lives for a single relay attempt; the durable copy belongs to the
/// [`MessageStore`](crate::MessageStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Sending user, if the sending connection identified itself
    pub sender: Option<UserId>,
    /// Intended recipient
    pub recipient: UserId,
    /// Message body, delivered verbatim
    pub payload: String,
}

impl MessageEvent {
    /// Create a new message event.
    pub fn new(sender: Option<UserId>, recipient: UserId, payload: impl Into<String>) -> Self {
        Self {
            sender,
            recipient,
            payload: payload.into(),
        }
    }
}
