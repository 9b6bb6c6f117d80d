//! Error types for the relay core.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`MessageStore`](crate::MessageStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or the query failed
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The message was rejected before being written
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// No stored message has the given id
    #[error("Message not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Create a new store-unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a new invalid-message error.
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }
}

/// Failures observed while relaying a message.
///
/// These never escape the relay engine as `Err`; they are recorded in the
/// [`RelayOutcome`](crate::RelayOutcome) and logged.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The message store returned an error
    #[error("Message store failed: {0}")]
    Store(#[from] StoreError),

    /// The message store did not answer in time
    #[error("Message store timed out after {0:?}")]
    StoreTimeout(Duration),
}

impl RelayError {
    /// Whether this failure came from the store being unreachable or slow,
    /// as opposed to the message itself being rejected.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Self::StoreTimeout(_) | Self::Store(StoreError::Unavailable(_))
        )
    }
}
