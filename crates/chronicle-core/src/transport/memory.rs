//! In-memory transport double for tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Transport, TransportError, TransportResult};

/// In-memory [`Transport`] backed by a path → bytes map.
///
/// Supports failure injection (`fail_ping`, `reject_auth`, per-path write
/// failures) and counts reads/writes so tests can assert that a no-op sync
/// run transfers nothing.
#[derive(Default)]
pub struct MemoryTransport {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_ping: AtomicBool,
    reject_auth: AtomicBool,
    failing_writes: Mutex<HashSet<String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryTransport {
    /// Empty remote store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `ping` fail with a network error.
    pub fn set_fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    /// Make every operation fail with [`TransportError::Unauthorized`].
    pub fn set_reject_auth(&self, reject: bool) {
        self.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Make writes to the given path fail with a network error.
    pub fn fail_writes_to(&self, path: impl Into<String>) {
        self.failing_writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(path.into());
    }

    /// Stop failing writes previously injected with [`Self::fail_writes_to`].
    pub fn clear_write_failures(&self) {
        self.failing_writes.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
    }

    /// Number of `read` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `write` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Bytes currently stored at `path`, if any.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Seed a remote file without counting it as an engine write.
    pub fn put(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(path.into(), bytes.into());
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn check_auth(&self) -> TransportResult<()> {
        if self.reject_auth.load(Ordering::SeqCst) {
            Err(TransportError::Unauthorized)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn ping(&self) -> TransportResult<()> {
        self.check_auth()?;
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(TransportError::Network("ping failed".to_string()));
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> TransportResult<Vec<u8>> {
        self.check_auth()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> TransportResult<()> {
        self.check_auth()?;
        if self
            .failing_writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(path)
        {
            return Err(TransportError::Network(format!("write to {path} failed")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn mkdir(&self, _path: &str) -> TransportResult<()> {
        // Collections are implicit in the flat map
        self.check_auth()
    }

    async fn remove(&self, path: &str) -> TransportResult<()> {
        self.check_auth()?;
        let mut files = self.files.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let prefix = format!("{path}/");
        files.retain(|key, _| key != path && !key.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let transport = MemoryTransport::new();
        transport.write("a/b.json", b"{}").await.unwrap();
        assert_eq!(transport.read("a/b.json").await.unwrap(), b"{}");
        assert_eq!(transport.write_count(), 1);
        assert_eq!(transport.read_count(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let transport = MemoryTransport::new();
        let error = transport.read("missing").await.unwrap_err();
        assert!(matches!(error, TransportError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_is_recursive_and_idempotent() {
        let transport = MemoryTransport::new();
        transport.put("dir/a", b"1".to_vec());
        transport.put("dir/sub/b", b"2".to_vec());
        transport.put("dirx", b"3".to_vec());

        transport.remove("dir").await.unwrap();
        assert_eq!(transport.paths(), vec!["dirx".to_string()]);
        transport.remove("dir").await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_rejection() {
        let transport = MemoryTransport::new();
        transport.set_reject_auth(true);
        assert!(matches!(
            transport.ping().await.unwrap_err(),
            TransportError::Unauthorized
        ));
    }
}
