//! Run coordination primitives.
//!
//! The sync engine and the file migrator both mutate attachment records;
//! they coordinate through a shared per-attachment-id lock rather than a
//! global lock, so unrelated attachments are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::models::AttachmentId;

/// Cooperative cancellation signal, observed between entity operations.
///
/// An in-flight per-entity operation is allowed to finish; cancellation
/// only stops further entities from being processed.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Fresh, uncancelled flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag at the start of a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-attachment-id operation locks shared by sync and migration.
#[derive(Default)]
pub struct OperationLocks {
    inner: Mutex<HashMap<AttachmentId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held while one engine operates on one attachment.
pub struct OperationGuard {
    _guard: OwnedMutexGuard<()>,
}

impl OperationLocks {
    /// Empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one attachment, waiting if the other engine
    /// holds it.
    pub async fn acquire(&self, id: AttachmentId) -> OperationGuard {
        let lock = {
            let mut inner = self
                .inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(inner.entry(id).or_default())
        };
        OperationGuard {
            _guard: lock.lock_owned().await,
        }
    }
}
