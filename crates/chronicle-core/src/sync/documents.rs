//! Remote layout and wire documents.
//!
//! The remote store is document-driven: one journals-metadata document
//! indexes every journal record and the set of periods that have entry
//! bundles, so the engine can enumerate the remote with plain reads and no
//! directory listing. Entry bundles are append-friendly period documents;
//! one upload carries many entries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::models::{Attachment, Entry, Journal, JournalId, Period};

/// Root collection for one installation.
pub const REMOTE_ROOT: &str = "journal_app";

/// Path of the journals-metadata document.
#[must_use]
pub fn journals_doc_path() -> String {
    format!("{REMOTE_ROOT}/journals.json")
}

/// Path of one journal's entry bundle for one period.
#[must_use]
pub fn bundle_path(journal_id: &JournalId, period: Period) -> String {
    format!("{REMOTE_ROOT}/entries/{journal_id}/{period}.json")
}

/// Path of an attachment's content, mirroring the modern local scheme.
#[must_use]
pub fn file_path(relative: &str) -> String {
    format!("{REMOTE_ROOT}/files/{relative}")
}

/// Content fingerprint: hex-encoded SHA-256.
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Version tag of one journal record, independent of its siblings in the
/// shared document.
pub fn journal_fingerprint(journal: &Journal) -> Result<String> {
    Ok(fingerprint(&serde_json::to_vec(journal)?))
}

/// The journals-metadata document at [`journals_doc_path`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalsDocument {
    /// All journal records known to the remote, keyed by id.
    #[serde(default)]
    pub journals: BTreeMap<JournalId, Journal>,
    /// Periods that have an entry bundle document, per journal.
    #[serde(default)]
    pub periods: BTreeMap<JournalId, BTreeSet<String>>,
}

impl JournalsDocument {
    /// Parse a document from remote bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Canonical serialization (BTree ordering makes this deterministic).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Look up one journal record.
    #[must_use]
    pub fn journal(&self, id: &JournalId) -> Option<&Journal> {
        self.journals.get(id)
    }

    /// Insert or replace a journal record.
    pub fn upsert_journal(&mut self, journal: Journal) {
        self.journals.insert(journal.id, journal);
    }

    /// Record that a bundle document exists for the given period.
    ///
    /// Returns whether the index changed.
    pub fn add_period(&mut self, journal_id: JournalId, period: Period) -> bool {
        self.periods
            .entry(journal_id)
            .or_default()
            .insert(period.to_string())
    }

    /// Periods indexed for one journal.
    pub fn periods_for(&self, journal_id: &JournalId) -> impl Iterator<Item = Period> + '_ {
        self.periods
            .get(journal_id)
            .into_iter()
            .flatten()
            .filter_map(|p| p.parse::<Period>().ok())
    }
}

/// One entry plus its attachment metadata, as stored in a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// The entry row.
    pub entry: Entry,
    /// Attachment metadata for the entry. Content bytes live at
    /// [`file_path`] of each attachment's path.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// One journal's entries for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBundle {
    /// Owning journal.
    pub journal_id: JournalId,
    /// Period this bundle covers (`YYYY-MM`).
    pub period: String,
    /// Entry records, sorted by entry id.
    pub entries: Vec<EntryRecord>,
}

impl EntryBundle {
    /// Build a canonical bundle from records (sorts by entry id).
    #[must_use]
    pub fn new(journal_id: JournalId, period: Period, mut entries: Vec<EntryRecord>) -> Self {
        entries.sort_by_key(|record| record.entry.id);
        Self {
            journal_id,
            period: period.to_string(),
            entries,
        }
    }

    /// Parse a bundle from remote bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Canonical serialization.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Merge two versions of the same bundle, entry by entry.
    ///
    /// Last write wins per entry (`updated_at`); equal timestamps keep the
    /// local record so the outcome is deterministic and needless uploads
    /// are avoided.
    #[must_use]
    pub fn merge(local: &Self, remote: &Self) -> Self {
        let mut merged: BTreeMap<_, EntryRecord> = local
            .entries
            .iter()
            .map(|record| (record.entry.id, record.clone()))
            .collect();

        for record in &remote.entries {
            match merged.get(&record.entry.id) {
                Some(existing) if existing.entry.updated_at >= record.entry.updated_at => {}
                _ => {
                    merged.insert(record.entry.id, record.clone());
                }
            }
        }

        Self {
            journal_id: local.journal_id,
            period: local.period.clone(),
            entries: merged.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryId;
    use pretty_assertions::assert_eq;

    fn record(journal_id: JournalId, body: &str, updated_at: i64) -> EntryRecord {
        let mut entry = Entry::new(journal_id, body);
        entry.updated_at = updated_at;
        EntryRecord {
            entry,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_paths() {
        let journal_id: JournalId = "0190a8c2-0000-7000-8000-000000000001".parse().unwrap();
        assert_eq!(journals_doc_path(), "journal_app/journals.json");
        assert_eq!(
            bundle_path(&journal_id, "2024-03".parse().unwrap()),
            format!("journal_app/entries/{journal_id}/2024-03.json")
        );
        assert_eq!(
            file_path("images/2024/03/15/x/a.jpg"),
            "journal_app/files/images/2024/03/15/x/a.jpg"
        );
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint(b"abc"), fingerprint(b"abc"));
        assert_ne!(fingerprint(b"abc"), fingerprint(b"abd"));
    }

    #[test]
    fn test_journals_document_roundtrip() {
        let mut doc = JournalsDocument::default();
        let journal = Journal::new("Travel").unwrap();
        doc.upsert_journal(journal.clone());
        assert!(doc.add_period(journal.id, "2024-03".parse().unwrap()));
        assert!(!doc.add_period(journal.id, "2024-03".parse().unwrap()));

        let parsed = JournalsDocument::from_bytes(&doc.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, doc);
        assert_eq!(
            parsed.periods_for(&journal.id).collect::<Vec<_>>(),
            vec!["2024-03".parse().unwrap()]
        );
    }

    #[test]
    fn test_bundle_serialization_is_canonical() {
        let journal_id = JournalId::new();
        let a = record(journal_id, "a", 1);
        let b = record(journal_id, "b", 2);
        let period: Period = "2024-03".parse().unwrap();

        let one = EntryBundle::new(journal_id, period, vec![a.clone(), b.clone()]);
        let two = EntryBundle::new(journal_id, period, vec![b, a]);
        assert_eq!(one.to_bytes().unwrap(), two.to_bytes().unwrap());
    }

    #[test]
    fn test_merge_last_write_wins_per_entry() {
        let journal_id = JournalId::new();
        let period: Period = "2024-03".parse().unwrap();

        let shared_id = EntryId::new();
        let mut local_version = record(journal_id, "local edit", 200);
        local_version.entry.id = shared_id;
        let mut remote_version = record(journal_id, "remote edit", 100);
        remote_version.entry.id = shared_id;

        let local_only = record(journal_id, "local only", 50);
        let remote_only = record(journal_id, "remote only", 60);

        let local = EntryBundle::new(
            journal_id,
            period,
            vec![local_version.clone(), local_only.clone()],
        );
        let remote = EntryBundle::new(
            journal_id,
            period,
            vec![remote_version.clone(), remote_only.clone()],
        );

        let merged = EntryBundle::merge(&local, &remote);
        assert_eq!(merged.entries.len(), 3);
        let bodies: Vec<_> = merged
            .entries
            .iter()
            .map(|r| r.entry.body.as_str())
            .collect();
        assert!(bodies.contains(&"local edit"));
        assert!(bodies.contains(&"local only"));
        assert!(bodies.contains(&"remote only"));

        // Merge is symmetric in outcome when timestamps differ
        let merged_other_way = EntryBundle::merge(&remote, &local);
        let mut bodies_other: Vec<_> = merged_other_way
            .entries
            .iter()
            .map(|r| r.entry.body.as_str())
            .collect();
        bodies_other.sort_unstable();
        let mut bodies_sorted = bodies;
        bodies_sorted.sort_unstable();
        assert_eq!(bodies_sorted, bodies_other);
    }

    #[test]
    fn test_merge_tie_keeps_local() {
        let journal_id = JournalId::new();
        let period: Period = "2024-03".parse().unwrap();
        let shared_id = EntryId::new();

        let mut local_version = record(journal_id, "local", 100);
        local_version.entry.id = shared_id;
        let mut remote_version = record(journal_id, "remote", 100);
        remote_version.entry.id = shared_id;

        let merged = EntryBundle::merge(
            &EntryBundle::new(journal_id, period, vec![local_version]),
            &EntryBundle::new(journal_id, period, vec![remote_version]),
        );
        assert_eq!(merged.entries[0].entry.body, "local");
    }
}
