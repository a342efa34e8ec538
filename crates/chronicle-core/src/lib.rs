//! chronicle-core - Core library for Chronicle
//!
//! This crate contains the shared models, local store, WebDAV transport,
//! reconciliation engine, and attachment file migration used by all
//! Chronicle interfaces.

pub mod credentials;
pub mod db;
pub mod error;
pub mod migration;
pub mod models;
pub mod sync;
pub mod transport;

pub use error::{Error, Result};
pub use migration::{FileMigrator, MigrationProgressCallback};
pub use models::{
    Attachment, AttachmentId, Entry, EntryId, Journal, JournalId, MigrationResult, SyncConfig,
    SyncConfigId, SyncState, SyncStatus, ValidationReport,
};
pub use sync::{CancelFlag, OperationLocks, StatusCallback, SyncService, SyncStores};
