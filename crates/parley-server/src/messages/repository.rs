//! Message repository for Parley Server
//!
//! Stores direct messages in libSQL and answers the recovery queries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_relay::{MessageEvent, MessageStore, StoreError, StoredMessage, UserId};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::validate_body;
use crate::db::Database;

const SELECT_COLUMNS: &str = "SELECT id, sender, recipient, body, delivered, created_at FROM messages";

/// libSQL-backed message store
#[derive(Clone)]
pub struct MessageRepository {
    db: Arc<Database>,
}

impl MessageRepository {
    /// Create a new message repository
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn query_messages(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| StoreError::unavailable(format!("Failed to query messages: {}", e)))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::unavailable(format!("Failed to read message row: {}", e)))?
        {
            messages.push(row_to_message(&row)?);
        }
        Ok(messages)
    }
}

#[async_trait]
impl MessageStore for MessageRepository {
    #[instrument(skip(self, event), fields(recipient = %event.recipient))]
    async fn persist(&self, event: &MessageEvent) -> Result<StoredMessage, StoreError> {
        validate_body(&event.payload)?;

        // UUID v7 for time-sortable IDs
        let id = Uuid::now_v7().to_string();
        let created_at = Utc::now();

        let conn = self.db.connection().await?;
        conn.execute(
            "INSERT INTO messages (id, sender, recipient, body, delivered, created_at) VALUES (?, ?, ?, ?, 0, ?)",
            libsql::params![
                id.clone(),
                event.sender.as_ref().map(|s| s.as_str().to_string()),
                event.recipient.as_str(),
                event.payload.as_str(),
                created_at.to_rfc3339()
            ],
        )
        .await
        .map_err(|e| StoreError::unavailable(format!("Failed to insert message: {}", e)))?;

        debug!("Created message: {}", id);

        Ok(StoredMessage {
            id,
            sender: event.sender.clone(),
            recipient: event.recipient.clone(),
            body: event.payload.clone(),
            delivered: false,
            created_at,
        })
    }

    #[instrument(skip(self))]
    async fn mark_delivered(&self, message_id: &str) -> Result<(), StoreError> {
        let conn = self.db.connection().await?;
        let updated = conn
            .execute(
                "UPDATE messages SET delivered = 1 WHERE id = ?",
                libsql::params![message_id],
            )
            .await
            .map_err(|e| StoreError::unavailable(format!("Failed to update message: {}", e)))?;

        if updated == 0 {
            return Err(StoreError::NotFound(message_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn fetch_undelivered(&self, user_id: &UserId) -> Result<Vec<StoredMessage>, StoreError> {
        let sql = format!(
            "{} WHERE recipient = ? AND delivered = 0 ORDER BY rowid",
            SELECT_COLUMNS
        );
        self.query_messages(&sql, libsql::params![user_id.as_str()])
            .await
    }

    #[instrument(skip(self), fields(user_a = %user_a, user_b = %user_b))]
    async fn fetch_conversation(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let sql = format!(
            "{} WHERE (sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1) ORDER BY rowid",
            SELECT_COLUMNS
        );
        self.query_messages(&sql, libsql::params![user_a.as_str(), user_b.as_str()])
            .await
    }
}

fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, StoreError> {
    let column_error = |e: libsql::Error| StoreError::unavailable(format!("Failed to read column: {}", e));

    let id: String = row.get(0).map_err(column_error)?;
    let sender: Option<String> = row.get(1).map_err(column_error)?;
    let recipient: String = row.get(2).map_err(column_error)?;
    let body: String = row.get(3).map_err(column_error)?;
    let delivered: i64 = row.get(4).map_err(column_error)?;
    let created_at: String = row.get(5).map_err(column_error)?;

    let recipient = UserId::new(recipient)
        .ok_or_else(|| StoreError::unavailable(format!("Message {} has no recipient", id)))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::unavailable(format!("Invalid timestamp on message {}: {}", id, e)))?;

    Ok(StoredMessage {
        sender: sender.and_then(UserId::new),
        recipient,
        body,
        delivered: delivered != 0,
        created_at,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MigrationRunner;

    async fn repo() -> MessageRepository {
        let db = Database::in_memory("test-messages").await.unwrap();
        MigrationRunner::messages().run(&db).await.unwrap();
        MessageRepository::new(Arc::new(db))
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn event(from: &str, to: &str, body: &str) -> MessageEvent {
        MessageEvent::new(Some(user(from)), user(to), body)
    }

    #[tokio::test]
    async fn test_persist_and_fetch_undelivered() {
        let repo = repo().await;

        let stored = repo.persist(&event("alice", "bob", "hi")).await.unwrap();
        assert_eq!(stored.body, "hi");
        assert_eq!(stored.sender, Some(user("alice")));
        assert!(!stored.delivered);

        let pending = repo.fetch_undelivered(&user("bob")).await.unwrap();
        assert_eq!(pending, vec![StoredMessage {
            created_at: pending[0].created_at,
            ..stored
        }]);

        assert!(repo.fetch_undelivered(&user("alice")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_delivered() {
        let repo = repo().await;

        let first = repo.persist(&event("alice", "bob", "one")).await.unwrap();
        repo.persist(&event("alice", "bob", "two")).await.unwrap();

        repo.mark_delivered(&first.id).await.unwrap();

        let pending = repo.fetch_undelivered(&user("bob")).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, "two");
    }

    #[tokio::test]
    async fn test_mark_delivered_unknown_id() {
        let repo = repo().await;
        let result = repo.mark_delivered("missing").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_conversation_both_directions_in_order() {
        let repo = repo().await;

        repo.persist(&event("alice", "bob", "hey bob")).await.unwrap();
        repo.persist(&event("carol", "bob", "unrelated")).await.unwrap();
        repo.persist(&event("bob", "alice", "hey alice")).await.unwrap();
        repo.persist(&event("alice", "bob", "how are you")).await.unwrap();

        let conversation = repo
            .fetch_conversation(&user("alice"), &user("bob"))
            .await
            .unwrap();
        let bodies: Vec<&str> = conversation.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["hey bob", "hey alice", "how are you"]);

        // Argument order does not matter
        let reversed = repo
            .fetch_conversation(&user("bob"), &user("alice"))
            .await
            .unwrap();
        assert_eq!(reversed.len(), 3);
    }

    #[tokio::test]
    async fn test_persist_without_sender() {
        let repo = repo().await;

        let stored = repo
            .persist(&MessageEvent::new(None, user("bob"), "who am i"))
            .await
            .unwrap();
        assert!(stored.sender.is_none());

        let pending = repo.fetch_undelivered(&user("bob")).await.unwrap();
        assert!(pending[0].sender.is_none());
    }

    #[tokio::test]
    async fn test_persist_rejects_empty_body() {
        let repo = repo().await;

        let result = repo.persist(&event("alice", "bob", "  ")).await;
        assert!(matches!(result, Err(StoreError::InvalidMessage(_))));
        assert!(repo.fetch_undelivered(&user("bob")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_schema_reports_unavailable() {
        let db = Database::in_memory("no-migrations").await.unwrap();
        let repo = MessageRepository::new(Arc::new(db));

        let result = repo.persist(&event("alice", "bob", "hi")).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
