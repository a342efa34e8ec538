//! Synchronization core: wire documents, reconciliation engine, and the
//! caller-facing service.

mod documents;
mod engine;
mod locks;


pub use documents::{
    bundle_path, file_path, fingerprint, journal_fingerprint, journals_doc_path, EntryBundle,
    EntryRecord, JournalsDocument, REMOTE_ROOT,
};
pub use engine::{
    ConflictPolicy, StatusCallback, SyncEngine, SyncService, SyncStores, TransportFactory,
    WebDavTransportFactory,
};
pub use locks::{CancelFlag, OperationGuard, OperationLocks};
