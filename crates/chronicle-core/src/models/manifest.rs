//! Sync manifest model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::attachment::AttachmentId;
use super::journal::{JournalId, Period};

/// Identifies one tracked entity within a sync configuration's manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKey {
    /// A journal's metadata record
    Journal(JournalId),
    /// One journal's entry bundle for one time period
    EntryBundle(JournalId, Period),
    /// An attachment's content
    Attachment(AttachmentId),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Journal(id) => write!(f, "journal:{id}"),
            Self::EntryBundle(id, period) => write!(f, "bundle:{id}:{period}"),
            Self::Attachment(id) => write!(f, "attachment:{id}"),
        }
    }
}

impl FromStr for EntityKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("Invalid entity key: {s}")))?;
        match kind {
            "journal" => {
                let id = rest
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("Invalid entity key: {s}")))?;
                Ok(Self::Journal(id))
            }
            "bundle" => {
                let (journal, period) = rest
                    .split_once(':')
                    .ok_or_else(|| Error::InvalidInput(format!("Invalid entity key: {s}")))?;
                let journal = journal
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("Invalid entity key: {s}")))?;
                Ok(Self::EntryBundle(journal, period.parse()?))
            }
            "attachment" => {
                let id = rest
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("Invalid entity key: {s}")))?;
                Ok(Self::Attachment(id))
            }
            other => Err(Error::InvalidInput(format!(
                "Unknown entity key kind: {other}"
            ))),
        }
    }
}

/// Last known synchronized state of one tracked entity.
///
/// An entry exists only after the engine has successfully written the entity
/// to or read it from the remote at least once; absence means "never
/// synced", not "deleted". Entries are replaced wholesale, never
/// field-patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path of the entity's document/content on the remote.
    pub remote_path: String,
    /// Hash of the local content as of the last sync.
    pub fingerprint: String,
    /// Hash of the remote content as of the last sync.
    pub remote_version: String,
    /// When the entity was last synchronized (Unix ms).
    pub last_synced_at: i64,
}

impl ManifestEntry {
    /// Create a manifest entry recorded immediately after a confirmed
    /// remote operation.
    #[must_use]
    pub fn new(
        remote_path: impl Into<String>,
        fingerprint: impl Into<String>,
        remote_version: impl Into<String>,
    ) -> Self {
        Self {
            remote_path: remote_path.into(),
            fingerprint: fingerprint.into(),
            remote_version: remote_version.into(),
            last_synced_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_roundtrip() {
        let keys = [
            EntityKey::Journal(JournalId::new()),
            EntityKey::EntryBundle(JournalId::new(), "2024-03".parse().unwrap()),
            EntityKey::Attachment(AttachmentId::new()),
        ];
        for key in keys {
            let parsed: EntityKey = key.to_string().parse().unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn test_entity_key_rejects_garbage() {
        assert!("".parse::<EntityKey>().is_err());
        assert!("journal".parse::<EntityKey>().is_err());
        assert!("widget:123".parse::<EntityKey>().is_err());
        assert!("bundle:not-a-uuid:2024-03".parse::<EntityKey>().is_err());
    }
}
