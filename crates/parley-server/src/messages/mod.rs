//! Messages module for Parley Server
//!
//! This module provides the libSQL-backed [`MessageStore`] used by the relay
//! engine and the message REST routes.
//!
//! # Example
//!
//! ```ignore
//! use parley_server::messages::MessageRepository;
//!
//! let repo = MessageRepository::new(db);
//! let event = MessageEvent::new(Some(alice), bob, "Hello, world!");
//! let stored = repo.persist(&event).await?;
//! ```
//!
//! [`MessageStore`]: parley_relay::MessageStore

mod repository;

pub use repository::MessageRepository;

use parley_relay::StoreError;

use crate::db::DatabaseError;

/// Maximum message body length, in characters
pub const MAX_BODY_CHARS: usize = 4096;

/// Reject bodies the store will not accept.
pub fn validate_body(body: &str) -> Result<(), StoreError> {
    if body.trim().is_empty() {
        return Err(StoreError::invalid_message("message body is empty"));
    }
    let chars = body.chars().count();
    if chars > MAX_BODY_CHARS {
        return Err(StoreError::invalid_message(format!(
            "message body too long: max {} characters, got {}",
            MAX_BODY_CHARS, chars
        )));
    }
    Ok(())
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::unavailable(err.to_string())
    }
}
