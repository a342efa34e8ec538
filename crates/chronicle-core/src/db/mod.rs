//! Database layer for Chronicle

mod connection;
mod migrations;
mod repository;
mod sync_repository;

pub use connection::Database;
pub use repository::{
    entries_by_period, AttachmentRepository, EntryRepository, JournalRepository,
    SqliteAttachmentRepository, SqliteEntryRepository, SqliteJournalRepository,
};
pub use sync_repository::{
    ManifestStore, SqliteManifestStore, SqliteStatusStore, SqliteSyncConfigStore, StatusStore,
    SyncConfigStore,
};
