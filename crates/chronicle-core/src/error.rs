//! Error types for chronicle-core

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias using chronicle-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in chronicle-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Credential lookup failed or credential missing for a sync config
    #[error("Credential missing for sync config: {0}")]
    CredentialMissing(String),

    /// Credential store backend failure
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// A sync run is already active for the config
    #[error("Sync already in progress for config: {0}")]
    SyncInProgress(String),

    /// A file migration run is already active
    #[error("File migration already in progress")]
    MigrationInProgress,
}
