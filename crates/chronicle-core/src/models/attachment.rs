//! Attachment model and path classification

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::journal::EntryId;

/// A unique identifier for an attachment, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    /// Create a new unique attachment ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttachmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The kind of content an attachment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Photo or other image
    Photo,
    /// Audio recording
    Audio,
    /// Arbitrary document
    File,
    /// Saved map location snapshot
    Location,
}

impl AttachmentKind {
    /// Top-level directory for this kind in the organized storage scheme.
    #[must_use]
    pub const fn type_dir(self) -> &'static str {
        match self {
            Self::Photo => "images",
            Self::Audio => "audio",
            Self::File => "documents",
            Self::Location => "locations",
        }
    }

    /// Stable name used for database storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Audio => "audio",
            Self::File => "file",
            Self::Location => "location",
        }
    }
}

impl FromStr for AttachmentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "photo" => Ok(Self::Photo),
            "audio" => Ok(Self::Audio),
            "file" => Ok(Self::File),
            "location" => Ok(Self::Location),
            other => Err(Error::InvalidInput(format!(
                "Unknown attachment kind: {other}"
            ))),
        }
    }
}

/// Classify a stored attachment path.
///
/// Legacy paths are absolute platform paths from before the organized
/// storage scheme: a leading `/` or `\`, or a drive-letter colon
/// (`C:\...`). Everything else is a relative, content-organized path.
#[must_use]
pub fn is_legacy_path(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        return true;
    }
    // Drive-letter prefix, e.g. "C:\photos\img.jpg" or "C:/photos/img.jpg"
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic()
    )
}

/// Attachment metadata persisted for an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique attachment identifier.
    pub id: AttachmentId,
    /// Parent entry identifier.
    pub entry_id: EntryId,
    /// Content kind.
    pub kind: AttachmentKind,
    /// Original file name.
    pub name: String,
    /// Stored path: absolute (legacy) or relative content-organized (modern).
    pub path: String,
    /// Attachment size in bytes.
    pub size_bytes: i64,
    /// Content MIME type.
    pub mime_type: String,
    /// Kind-specific metadata (e.g. location coordinates).
    pub metadata: BTreeMap<String, String>,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
}

impl Attachment {
    /// Create a new attachment metadata record.
    pub fn new(
        entry_id: EntryId,
        kind: AttachmentKind,
        name: impl Into<String>,
        path: impl Into<String>,
        size_bytes: i64,
        mime_type: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into().trim().to_string();
        let path = path.into().trim().to_string();
        let mime_type = mime_type.into().trim().to_string();

        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment name cannot be empty".to_string(),
            ));
        }
        if path.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment path cannot be empty".to_string(),
            ));
        }
        if mime_type.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment mime_type cannot be empty".to_string(),
            ));
        }
        if size_bytes < 0 {
            return Err(Error::InvalidInput(
                "Attachment size_bytes cannot be negative".to_string(),
            ));
        }

        Ok(Self {
            id: AttachmentId::new(),
            entry_id,
            kind,
            name,
            path,
            size_bytes,
            mime_type,
            metadata: BTreeMap::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Whether this attachment still points at a legacy absolute path.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        is_legacy_path(&self.path)
    }

    /// Synthesize the modern relative path for this attachment:
    /// `{type_dir}/{yyyy}/{mm}/{dd}/{entry_id}/{filename}`.
    ///
    /// The path is scoped by the owning entry, so two attachments with the
    /// same filename never collide at the target.
    #[must_use]
    pub fn modern_path(&self) -> String {
        use chrono::Datelike;

        let date: chrono::DateTime<chrono::Utc> =
            chrono::DateTime::from_timestamp_millis(self.created_at).unwrap_or_default();
        let filename = original_filename(&self.path, &self.name);
        format!(
            "{}/{:04}/{:02}/{:02}/{}/{}",
            self.kind.type_dir(),
            date.year(),
            date.month(),
            date.day(),
            self.entry_id,
            filename,
        )
    }
}

/// Pick the filename component for a migrated path.
///
/// Prefers the final component of the stored path; falls back to the
/// attachment's display name when the path has no usable component.
fn original_filename(path: &str, name: &str) -> String {
    let component = path
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    component.unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_id_unique() {
        let id1 = AttachmentId::new();
        let id2 = AttachmentId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_legacy_path_classification() {
        assert!(is_legacy_path("/var/mobile/Media/photo.jpg"));
        assert!(is_legacy_path("\\\\server\\share\\photo.jpg"));
        assert!(is_legacy_path("C:\\Users\\me\\photo.jpg"));
        assert!(is_legacy_path("d:/photos/photo.jpg"));
        assert!(!is_legacy_path("images/2024/03/15/abc/photo.jpg"));
        assert!(!is_legacy_path("documents/report.pdf"));
    }

    #[test]
    fn test_attachment_new_validates() {
        let entry_id = EntryId::new();
        assert!(Attachment::new(entry_id, AttachmentKind::Photo, "", "/p", 1, "image/png").is_err());
        assert!(Attachment::new(entry_id, AttachmentKind::Photo, "a", "", 1, "image/png").is_err());
        assert!(Attachment::new(entry_id, AttachmentKind::Photo, "a", "/p", 1, "").is_err());
        assert!(
            Attachment::new(entry_id, AttachmentKind::Photo, "a", "/p", -1, "image/png").is_err()
        );
    }

    #[test]
    fn test_modern_path_scoped_by_entry_and_date() {
        let mut attachment = Attachment::new(
            EntryId::new(),
            AttachmentKind::Photo,
            "photo.jpg",
            "/var/mobile/Media/photo.jpg",
            1234,
            "image/jpeg",
        )
        .unwrap();
        // 2024-03-15T12:00:00Z
        attachment.created_at = 1_710_504_000_000;

        let path = attachment.modern_path();
        assert_eq!(
            path,
            format!("images/2024/03/15/{}/photo.jpg", attachment.entry_id)
        );
        assert!(!is_legacy_path(&path));
    }

    #[test]
    fn test_modern_path_windows_source() {
        let mut attachment = Attachment::new(
            EntryId::new(),
            AttachmentKind::File,
            "report",
            "C:\\Users\\me\\Documents\\report.pdf",
            10,
            "application/pdf",
        )
        .unwrap();
        attachment.created_at = 1_710_504_000_000;

        assert!(attachment.modern_path().ends_with("/report.pdf"));
        assert!(attachment.modern_path().starts_with("documents/"));
    }

    #[test]
    fn test_same_filename_different_entries_never_collide() {
        let make = |entry_id| {
            let mut a = Attachment::new(
                entry_id,
                AttachmentKind::Photo,
                "img.jpg",
                "/tmp/img.jpg",
                1,
                "image/jpeg",
            )
            .unwrap();
            a.created_at = 1_710_504_000_000;
            a
        };
        let a = make(EntryId::new());
        let b = make(EntryId::new());
        assert_ne!(a.modern_path(), b.modern_path());
    }
}
