//! Database migration system for Parley Server
//!
//! This module provides:
//! - Compile-time embedded SQL migrations
//! - Version tracking via a migrations table
//! - Automatic migration on startup

use super::Database;
use super::DatabaseError;
use tracing::{debug, info, instrument};

/// Represents a single database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number (must be unique and incrementing)
    pub version: i64,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to execute for the migration
    pub sql: &'static str,
}

/// Message store schema
pub mod messages {
    use super::Migration;

    /// Direct messages with their live-delivery flag
    pub const V0001_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,                    -- Message ID (UUID v7)
    sender TEXT,                            -- Sending user id, NULL if unidentified
    recipient TEXT NOT NULL,                -- Recipient user id
    body TEXT NOT NULL,                     -- Message body
    delivered INTEGER NOT NULL DEFAULT 0,   -- 1 once handed to a live connection
    created_at TEXT NOT NULL                -- RFC 3339 timestamp
);

CREATE INDEX IF NOT EXISTS idx_messages_recipient_delivered ON messages(recipient, delivered);
CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender, recipient);
"#;

    /// Get all message store migrations in order
    pub fn all() -> Vec<Migration> {
        vec![Migration {
            version: 1,
            description: "Create messages table",
            sql: V0001_MESSAGES,
        }]
    }
}

/// Runs pending migrations against a database
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    /// Runner for the message store schema
    pub fn messages() -> Self {
        Self {
            migrations: messages::all(),
        }
    }

    /// Apply all migrations not yet recorded in `_migrations`.
    ///
    /// Returns the versions applied by this call.
    #[instrument(skip_all, fields(db = %db.name()))]
    pub async fn run(&self, db: &Database) -> Result<Vec<i64>, DatabaseError> {
        let conn = db.connection().await?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::MigrationFailed(format!("Failed to create migrations table: {}", e))
        })?;

        // Get applied migrations
        let mut applied: Vec<i64> = Vec::new();
        let mut rows = conn
            .query("SELECT version FROM _migrations ORDER BY version", ())
            .await
            .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to query migrations: {}", e)))?;

        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::MigrationFailed(format!("Failed to read migration row: {}", e))
        })? {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to get version from row: {}", e))
            })?;
            applied.push(version);
        }
        drop(rows);

        debug!("Already applied migrations: {:?}", applied);

        let mut newly_applied = Vec::new();
        for migration in &self.migrations {
            if applied.contains(&migration.version) {
                debug!("Skipping already applied migration v{}", migration.version);
                continue;
            }

            info!(
                "Applying migration v{}: {}",
                migration.version, migration.description
            );

            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::MigrationFailed(format!(
                    "Migration v{} failed: {}",
                    migration.version, e
                ))
            })?;

            conn.execute(
                "INSERT INTO _migrations (version, description) VALUES (?, ?)",
                (migration.version, migration.description),
            )
            .await
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e
                ))
            })?;

            newly_applied.push(migration.version);
        }

        if newly_applied.is_empty() {
            debug!("No new migrations to apply");
        } else {
            info!("Applied {} new migrations", newly_applied.len());
        }

        Ok(newly_applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let db = Database::in_memory("test-migrations").await.unwrap();
        let runner = MigrationRunner::messages();

        assert_eq!(runner.run(&db).await.unwrap(), vec![1]);
        assert!(runner.run(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_messages_table_exists() {
        let db = Database::in_memory("test-migrations").await.unwrap();
        MigrationRunner::messages().run(&db).await.unwrap();

        let conn = db.connection().await.unwrap();
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name='messages'",
                (),
            )
            .await
            .unwrap();

        assert!(rows.next().await.unwrap().is_some());
    }
}
