//! Journal, entry, and attachment repositories

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::{params, Row};

use crate::error::{Error, Result};
use crate::models::{Attachment, AttachmentId, Entry, EntryId, Journal, JournalId, Period};

use super::connection::Database;

/// Trait for journal storage operations
pub trait JournalRepository: Send + Sync {
    /// Insert a new journal
    fn insert(&self, journal: &Journal) -> Result<()>;

    /// Get a journal by ID (including soft-deleted rows)
    fn get(&self, id: &JournalId) -> Result<Option<Journal>>;

    /// List all journals, including soft-deleted tombstones
    fn list(&self) -> Result<Vec<Journal>>;

    /// Insert or replace a journal row wholesale
    fn upsert(&self, journal: &Journal) -> Result<()>;
}

/// Trait for entry storage operations
pub trait EntryRepository: Send + Sync {
    /// Insert a new entry
    fn insert(&self, entry: &Entry) -> Result<()>;

    /// Get an entry by ID (including soft-deleted rows)
    fn get(&self, id: &EntryId) -> Result<Option<Entry>>;

    /// List a journal's entries, including soft-deleted tombstones
    fn list_by_journal(&self, journal_id: &JournalId) -> Result<Vec<Entry>>;

    /// Insert or replace an entry row wholesale
    fn upsert(&self, entry: &Entry) -> Result<()>;
}

/// Trait for attachment storage operations
pub trait AttachmentRepository: Send + Sync {
    /// Insert a new attachment
    fn insert(&self, attachment: &Attachment) -> Result<()>;

    /// Get an attachment by ID
    fn get(&self, id: &AttachmentId) -> Result<Option<Attachment>>;

    /// List all attachments
    fn list(&self) -> Result<Vec<Attachment>>;

    /// List an entry's attachments
    fn list_by_entry(&self, entry_id: &EntryId) -> Result<Vec<Attachment>>;

    /// Rewrite an attachment's stored path
    fn update_path(&self, id: &AttachmentId, path: &str) -> Result<()>;

    /// Insert or replace an attachment row wholesale
    fn upsert(&self, attachment: &Attachment) -> Result<()>;
}

/// Group entries by the period their bundle belongs to.
pub fn entries_by_period(entries: &[Entry]) -> BTreeMap<Period, Vec<Entry>> {
    let mut bundles: BTreeMap<Period, Vec<Entry>> = BTreeMap::new();
    for entry in entries {
        bundles.entry(entry.period()).or_default().push(entry.clone());
    }
    bundles
}

/// `SQLite` implementation of [`JournalRepository`]
pub struct SqliteJournalRepository {
    db: Arc<Database>,
}

impl SqliteJournalRepository {
    /// Create a new repository over the shared database
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn parse_journal(row: &Row<'_>) -> rusqlite::Result<Journal> {
        let id: String = row.get(0)?;
        Ok(Journal {
            id: id.parse().unwrap_or_default(),
            name: row.get(1)?,
            color: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            is_deleted: row.get::<_, i32>(5)? != 0,
        })
    }
}

impl JournalRepository for SqliteJournalRepository {
    fn insert(&self, journal: &Journal) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO journals (id, name, color, created_at, updated_at, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    journal.id.as_str(),
                    journal.name,
                    journal.color,
                    journal.created_at,
                    journal.updated_at,
                    i32::from(journal.is_deleted)
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, id: &JournalId) -> Result<Option<Journal>> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT id, name, color, created_at, updated_at, is_deleted
                 FROM journals WHERE id = ?",
                params![id.as_str()],
                Self::parse_journal,
            );
            match result {
                Ok(journal) => Ok(Some(journal)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list(&self) -> Result<Vec<Journal>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, color, created_at, updated_at, is_deleted
                 FROM journals ORDER BY id",
            )?;
            let journals = stmt
                .query_map([], Self::parse_journal)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(journals)
        })
    }

    fn upsert(&self, journal: &Journal) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO journals
                 (id, name, color, created_at, updated_at, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    journal.id.as_str(),
                    journal.name,
                    journal.color,
                    journal.created_at,
                    journal.updated_at,
                    i32::from(journal.is_deleted)
                ],
            )?;
            Ok(())
        })
    }
}

/// `SQLite` implementation of [`EntryRepository`]
pub struct SqliteEntryRepository {
    db: Arc<Database>,
}

impl SqliteEntryRepository {
    /// Create a new repository over the shared database
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn parse_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
        let id: String = row.get(0)?;
        let journal_id: String = row.get(1)?;
        Ok(Entry {
            id: id.parse().unwrap_or_default(),
            journal_id: journal_id.parse().unwrap_or_default(),
            title: row.get(2)?,
            body: row.get(3)?,
            entry_date: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            is_deleted: row.get::<_, i32>(7)? != 0,
        })
    }
}

impl EntryRepository for SqliteEntryRepository {
    fn insert(&self, entry: &Entry) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entries
                 (id, journal_id, title, body, entry_date, created_at, updated_at, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.id.as_str(),
                    entry.journal_id.as_str(),
                    entry.title,
                    entry.body,
                    entry.entry_date,
                    entry.created_at,
                    entry.updated_at,
                    i32::from(entry.is_deleted)
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, id: &EntryId) -> Result<Option<Entry>> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT id, journal_id, title, body, entry_date, created_at, updated_at, is_deleted
                 FROM entries WHERE id = ?",
                params![id.as_str()],
                Self::parse_entry,
            );
            match result {
                Ok(entry) => Ok(Some(entry)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list_by_journal(&self, journal_id: &JournalId) -> Result<Vec<Entry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, journal_id, title, body, entry_date, created_at, updated_at, is_deleted
                 FROM entries WHERE journal_id = ? ORDER BY id",
            )?;
            let entries = stmt
                .query_map(params![journal_id.as_str()], Self::parse_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    fn upsert(&self, entry: &Entry) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO entries
                 (id, journal_id, title, body, entry_date, created_at, updated_at, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.id.as_str(),
                    entry.journal_id.as_str(),
                    entry.title,
                    entry.body,
                    entry.entry_date,
                    entry.created_at,
                    entry.updated_at,
                    i32::from(entry.is_deleted)
                ],
            )?;
            Ok(())
        })
    }
}

/// `SQLite` implementation of [`AttachmentRepository`]
pub struct SqliteAttachmentRepository {
    db: Arc<Database>,
}

impl SqliteAttachmentRepository {
    /// Create a new repository over the shared database
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn parse_attachment(row: &Row<'_>) -> rusqlite::Result<Attachment> {
        let id: String = row.get(0)?;
        let entry_id: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let kind = kind.parse().map_err(|e: Error| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let metadata: String = row.get(7)?;
        let metadata = serde_json::from_str(&metadata).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Attachment {
            id: id.parse().unwrap_or_default(),
            entry_id: entry_id.parse().unwrap_or_default(),
            kind,
            name: row.get(3)?,
            path: row.get(4)?,
            size_bytes: row.get(5)?,
            mime_type: row.get(6)?,
            metadata,
            created_at: row.get(8)?,
        })
    }

    const COLUMNS: &'static str =
        "id, entry_id, kind, name, path, size_bytes, mime_type, metadata, created_at";
}

impl AttachmentRepository for SqliteAttachmentRepository {
    fn insert(&self, attachment: &Attachment) -> Result<()> {
        let metadata = serde_json::to_string(&attachment.metadata)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO attachments
                 (id, entry_id, kind, name, path, size_bytes, mime_type, metadata, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    attachment.id.as_str(),
                    attachment.entry_id.as_str(),
                    attachment.kind.as_str(),
                    attachment.name,
                    attachment.path,
                    attachment.size_bytes,
                    attachment.mime_type,
                    metadata,
                    attachment.created_at
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, id: &AttachmentId) -> Result<Option<Attachment>> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                &format!("SELECT {} FROM attachments WHERE id = ?", Self::COLUMNS),
                params![id.as_str()],
                Self::parse_attachment,
            );
            match result {
                Ok(attachment) => Ok(Some(attachment)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list(&self) -> Result<Vec<Attachment>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM attachments ORDER BY id", Self::COLUMNS))?;
            let attachments = stmt
                .query_map([], Self::parse_attachment)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(attachments)
        })
    }

    fn list_by_entry(&self, entry_id: &EntryId) -> Result<Vec<Attachment>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM attachments WHERE entry_id = ? ORDER BY id",
                Self::COLUMNS
            ))?;
            let attachments = stmt
                .query_map(params![entry_id.as_str()], Self::parse_attachment)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(attachments)
        })
    }

    fn update_path(&self, id: &AttachmentId, path: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE attachments SET path = ? WHERE id = ?",
                params![path, id.as_str()],
            )?;
            if rows == 0 {
                return Err(Error::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    fn upsert(&self, attachment: &Attachment) -> Result<()> {
        let metadata = serde_json::to_string(&attachment.metadata)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO attachments
                 (id, entry_id, kind, name, path, size_bytes, mime_type, metadata, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    attachment.id.as_str(),
                    attachment.entry_id.as_str(),
                    attachment.kind.as_str(),
                    attachment.name,
                    attachment.path,
                    attachment.size_bytes,
                    attachment.mime_type,
                    metadata,
                    attachment.created_at
                ],
            )?;
            Ok(())
        })
    }
}
