//! Journal and entry models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a journal, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JournalId(Uuid);

impl JournalId {
    /// Create a new unique journal ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for JournalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JournalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JournalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A unique identifier for an entry, using UUID v7
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A journal grouping entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    /// Unique identifier
    pub id: JournalId,
    /// Display name
    pub name: String,
    /// Optional accent color (hex string)
    pub color: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete flag for sync
    pub is_deleted: bool,
}

impl Journal {
    /// Create a new journal with the given name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Journal name cannot be empty".to_string(),
            ));
        }

        let now = chrono::Utc::now().timestamp_millis();
        Ok(Self {
            id: JournalId::new(),
            name,
            color: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        })
    }
}

/// A journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique identifier
    pub id: EntryId,
    /// Parent journal identifier
    pub journal_id: JournalId,
    /// Optional title
    pub title: Option<String>,
    /// Entry body text
    pub body: String,
    /// The day this entry is about (Unix ms)
    pub entry_date: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete flag for sync
    pub is_deleted: bool,
}

impl Entry {
    /// Create a new entry in the given journal, dated now
    #[must_use]
    pub fn new(journal_id: JournalId, body: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: EntryId::new(),
            journal_id,
            title: None,
            body: body.into(),
            entry_date: now,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    /// The time period this entry's bundle belongs to
    #[must_use]
    pub fn period(&self) -> Period {
        Period::from_timestamp_millis(self.entry_date)
    }
}

/// A calendar month used to key entry bundles (`YYYY-MM`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Derive the period containing the given Unix-ms timestamp.
    ///
    /// Timestamps that predate the Unix epoch clamp to `1970-01`.
    #[must_use]
    pub fn from_timestamp_millis(millis: i64) -> Self {
        use chrono::Datelike;

        let date: chrono::DateTime<chrono::Utc> =
            chrono::DateTime::from_timestamp_millis(millis).unwrap_or_default();
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidInput(format!("Invalid period: {s}")))?;
        let year: i32 = year
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Invalid period year: {s}")))?;
        let month: u32 = month
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Invalid period month: {s}")))?;
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidInput(format!("Invalid period month: {s}")));
        }
        Ok(Self { year, month })
    }
}
