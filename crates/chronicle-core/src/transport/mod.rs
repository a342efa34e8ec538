//! Remote transport abstraction.
//!
//! A thin WebDAV-shaped contract: `ping`, `read`, `write`, `mkdir`,
//! `remove`. No retry or conflict logic lives here; the reconciliation
//! engine owns both.

mod memory;
mod webdav;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryTransport;
pub use webdav::{WebDavConfig, WebDavTransport};

/// Errors surfaced by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Credentials were rejected by the server
    #[error("Authentication rejected by server")]
    Unauthorized,

    /// The requested path does not exist on the remote
    #[error("Remote path not found: {0}")]
    NotFound(String),

    /// The operation exceeded the configured time bound
    #[error("Remote operation timed out: {0}")]
    Timeout(String),

    /// Any other network or protocol failure
    #[error("Network error: {0}")]
    Network(String),

    /// The path cannot be represented on the remote
    #[error("Invalid remote path: {0}")]
    InvalidPath(String),
}

impl TransportError {
    /// Whether this error invalidates the whole run rather than one entity.
    ///
    /// Auth rejection is always fatal; everything else is judged by where
    /// it happens (the engine treats any failure of the initial `ping` as
    /// fatal too).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Abstracted WebDAV semantics consumed by the sync engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Verify the server is reachable and the credentials are accepted.
    async fn ping(&self) -> TransportResult<()>;

    /// Read the full contents of a remote file.
    ///
    /// Fails with [`TransportError::NotFound`] when the path is absent.
    async fn read(&self, path: &str) -> TransportResult<Vec<u8>>;

    /// Create or overwrite a remote file.
    async fn write(&self, path: &str, bytes: &[u8]) -> TransportResult<()>;

    /// Create a remote collection. Idempotent: succeeds if it already
    /// exists. Parent collections are created as needed.
    async fn mkdir(&self, path: &str) -> TransportResult<()>;

    /// Remove a remote file or collection (recursive for collections).
    /// Succeeds if the path is already absent.
    async fn remove(&self, path: &str) -> TransportResult<()>;
}
