//! Database module for Parley Server
//!
//! This module provides a libSQL database layer with:
//! - In-memory or local file storage
//! - Automatic schema migrations
//! - Health check capabilities
//!
//! An in-memory libSQL database exists per connection, so in-memory
//! databases keep one shared connection behind a mutex; file databases open
//! a fresh connection per operation.

mod migrations;

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use libsql::{Connection, Database as LibSqlDatabase};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

pub use migrations::{Migration, MigrationRunner};

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal database error: {0}")]
    Internal(#[from] libsql::Error),
}

/// Configuration for database connections
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    /// Path to the database file (None for in-memory)
    pub path: Option<String>,
}

impl DatabaseConfig {
    /// File-backed configuration
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

/// Wrapper around a libsql database
#[derive(Clone)]
pub struct Database {
    db: Arc<LibSqlDatabase>,
    name: String,
    /// Shared connection for in-memory databases
    persistent: Option<Arc<Mutex<Connection>>>,
}

/// A connection borrowed from a [`Database`].
pub enum DbConnection<'a> {
    /// The shared connection of an in-memory database
    Shared(MutexGuard<'a, Connection>),
    /// A connection opened for this operation
    Owned(Connection),
}

impl Deref for DbConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            DbConnection::Shared(guard) => &**guard,
            DbConnection::Owned(conn) => conn,
        }
    }
}

impl Database {
    /// Open the database described by `config`
    pub async fn open(name: &str, config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        match &config.path {
            Some(path) => Self::open_local(name, path).await,
            None => Self::in_memory(name).await,
        }
    }

    /// Create a new in-memory database
    #[instrument(skip_all)]
    pub async fn in_memory(name: &str) -> Result<Self, DatabaseError> {
        debug!("Creating in-memory database: {}", name);
        let db = libsql::Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        Ok(Self {
            db: Arc::new(db),
            name: name.to_string(),
            persistent: Some(Arc::new(Mutex::new(conn))),
        })
    }

    /// Create or open a local file-based database
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_local(name: &str, path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        debug!("Opening local database '{}' at: {:?}", name, path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                ))
            })?;
        }

        let db = libsql::Builder::new_local(path).build().await?;

        info!("Opened database '{}' at {:?}", name, path);
        Ok(Self {
            db: Arc::new(db),
            name: name.to_string(),
            persistent: None,
        })
    }

    /// Get a connection to the database
    pub async fn connection(&self) -> Result<DbConnection<'_>, DatabaseError> {
        match &self.persistent {
            Some(shared) => Ok(DbConnection::Shared(shared.lock().await)),
            None => Ok(DbConnection::Owned(self.db.connect()?)),
        }
    }

    /// Get the database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the database is healthy by executing a simple query
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn health_check(&self) -> Result<bool, DatabaseError> {
        let conn = self.connection().await?;
        match conn.query("SELECT 1", ()).await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }
}
