//! Sync configuration model

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::journal::JournalId;

/// A unique identifier for a sync configuration, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncConfigId(Uuid);

impl SyncConfigId {
    /// Create a new unique config ID using UUID v7.
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

impl Default for SyncConfigId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncConfigId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How often a configuration should sync automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncFrequency {
    /// Only when the user asks
    #[default]
    Manual,
    /// Once when the app starts
    OnAppStart,
    /// Every hour
    Hourly,
    /// Every day
    Daily,
    /// Every week
    Weekly,
}

impl SyncFrequency {
    /// Stable name used for database storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::OnAppStart => "on_app_start",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

impl FromStr for SyncFrequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(Self::Manual),
            "on_app_start" => Ok(Self::OnAppStart),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(Error::InvalidInput(format!(
                "Unknown sync frequency: {other}"
            ))),
        }
    }
}

/// A named remote-endpoint configuration.
///
/// Credentials are stored out-of-band in a [`crate::credentials::CredentialStore`],
/// referenced by this config's `id`, and never embedded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Unique identifier; also the credential reference.
    pub id: SyncConfigId,
    /// WebDAV server URL (http/https).
    pub server_url: String,
    /// Account username for Basic auth.
    pub username: String,
    /// Human-readable name shown in settings.
    pub display_name: String,
    /// Whether this config participates in sync.
    pub enabled: bool,
    /// Completion time of the last successful run (Unix ms).
    pub last_sync_at: Option<i64>,
    /// Automatic sync cadence.
    pub frequency: SyncFrequency,
    /// Only sync on Wi-Fi (advisory; enforced by the caller).
    pub wifi_only: bool,
    /// Whether attachment bytes are synced alongside metadata.
    pub sync_attachments: bool,
    /// Whether remote payloads should be encrypted (reserved).
    pub encrypt_data: bool,
    /// Journals included in sync; empty means all journals.
    pub synced_journal_ids: BTreeSet<JournalId>,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
    /// Last settings-change timestamp (Unix ms).
    pub updated_at: i64,
}

impl SyncConfig {
    /// Create a new configuration for the given server.
    pub fn new(
        server_url: impl Into<String>,
        username: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<Self> {
        let server_url = server_url.into().trim().trim_end_matches('/').to_string();
        let username = username.into().trim().to_string();
        let display_name = display_name.into().trim().to_string();

        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(Error::InvalidInput(
                "Server URL must include http:// or https://".to_string(),
            ));
        }
        if username.is_empty() {
            return Err(Error::InvalidInput(
                "Username cannot be empty".to_string(),
            ));
        }

        let now = chrono::Utc::now().timestamp_millis();
        Ok(Self {
            id: SyncConfigId::new(),
            server_url,
            username,
            display_name,
            enabled: true,
            last_sync_at: None,
            frequency: SyncFrequency::Manual,
            wifi_only: false,
            sync_attachments: true,
            encrypt_data: false,
            synced_journal_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether the given journal is in scope for this configuration.
    ///
    /// An empty `synced_journal_ids` set means all journals are included.
    #[must_use]
    pub fn includes_journal(&self, journal_id: &JournalId) -> bool {
        self.synced_journal_ids.is_empty() || self.synced_journal_ids.contains(journal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_validates_url() {
        assert!(SyncConfig::new("dav.example.com", "anna", "Home").is_err());
        assert!(SyncConfig::new("https://dav.example.com", "", "Home").is_err());

        let config = SyncConfig::new("https://dav.example.com/remote.php/", "anna", "Home").unwrap();
        assert_eq!(config.server_url, "https://dav.example.com/remote.php");
        assert!(config.enabled);
        assert!(config.last_sync_at.is_none());
        assert_eq!(config.frequency, SyncFrequency::Manual);
    }

    #[test]
    fn test_empty_journal_scope_includes_all() {
        let mut config = SyncConfig::new("https://dav.example.com", "anna", "Home").unwrap();
        let journal = JournalId::new();
        assert!(config.includes_journal(&journal));

        config.synced_journal_ids.insert(JournalId::new());
        assert!(!config.includes_journal(&journal));

        config.synced_journal_ids.insert(journal);
        assert!(config.includes_journal(&journal));
    }

    #[test]
    fn test_frequency_roundtrip() {
        for frequency in [
            SyncFrequency::Manual,
            SyncFrequency::OnAppStart,
            SyncFrequency::Hourly,
            SyncFrequency::Daily,
            SyncFrequency::Weekly,
        ] {
            let parsed: SyncFrequency = frequency.as_str().parse().unwrap();
            assert_eq!(parsed, frequency);
        }
        assert!("sometimes".parse::<SyncFrequency>().is_err());
    }
}
