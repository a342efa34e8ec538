//! Sync configuration, manifest, and status stores

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::{params, Row};

use crate::error::{Error, Result};
use crate::models::{
    EntityKey, ManifestEntry, SyncConfig, SyncConfigId, SyncState, SyncStatus,
};

use super::connection::Database;

/// Trait for sync configuration storage
pub trait SyncConfigStore: Send + Sync {
    /// Create a new configuration
    fn create(&self, config: &SyncConfig) -> Result<()>;

    /// Replace a configuration wholesale
    fn update(&self, config: &SyncConfig) -> Result<()>;

    /// Delete a configuration.
    ///
    /// Cascades to the config's manifest and persisted status rows; this
    /// is the only place manifests are destroyed wholesale. The credential
    /// cascade happens in the service layer, which owns the credential
    /// store.
    fn delete(&self, id: &SyncConfigId) -> Result<()>;

    /// Get a configuration by ID
    fn get(&self, id: &SyncConfigId) -> Result<Option<SyncConfig>>;

    /// List all configurations
    fn list(&self) -> Result<Vec<SyncConfig>>;

    /// List configurations with sync enabled
    fn list_enabled(&self) -> Result<Vec<SyncConfig>>;
}

/// Trait for manifest storage.
///
/// Mutations are append/replace-only per key: an entry is written
/// atomically after its corresponding remote operation is confirmed, or
/// not at all.
pub trait ManifestStore: Send + Sync {
    /// Load the full manifest for a configuration
    fn load(&self, config_id: &SyncConfigId) -> Result<BTreeMap<EntityKey, ManifestEntry>>;

    /// Write one manifest entry wholesale
    fn save_entry(
        &self,
        config_id: &SyncConfigId,
        key: &EntityKey,
        entry: &ManifestEntry,
    ) -> Result<()>;

    /// Drop every manifest entry for a configuration, forcing a full
    /// re-diff on the next run
    fn clear(&self, config_id: &SyncConfigId) -> Result<()>;
}

/// Trait for persisting the last terminal sync status per configuration
pub trait StatusStore: Send + Sync {
    /// Save a terminal status for display
    fn save(&self, status: &SyncStatus) -> Result<()>;

    /// Load the last terminal status, if any run was recorded
    fn load(&self, config_id: &SyncConfigId) -> Result<Option<SyncStatus>>;
}

/// `SQLite` implementation of [`SyncConfigStore`]
pub struct SqliteSyncConfigStore {
    db: Arc<Database>,
}

impl SqliteSyncConfigStore {
    /// Create a new store over the shared database
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn parse_config(row: &Row<'_>) -> rusqlite::Result<SyncConfig> {
        let id: String = row.get(0)?;
        let frequency: String = row.get(6)?;
        let frequency = frequency.parse().map_err(|e: Error| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let synced: String = row.get(10)?;
        let synced_journal_ids = serde_json::from_str(&synced).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(SyncConfig {
            id: id.parse().unwrap_or_default(),
            server_url: row.get(1)?,
            username: row.get(2)?,
            display_name: row.get(3)?,
            enabled: row.get::<_, i32>(4)? != 0,
            last_sync_at: row.get(5)?,
            frequency,
            wifi_only: row.get::<_, i32>(7)? != 0,
            sync_attachments: row.get::<_, i32>(8)? != 0,
            encrypt_data: row.get::<_, i32>(9)? != 0,
            synced_journal_ids,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    const COLUMNS: &'static str = "id, server_url, username, display_name, enabled, last_sync_at, \
         frequency, wifi_only, sync_attachments, encrypt_data, synced_journal_ids, \
         created_at, updated_at";

    fn write(&self, config: &SyncConfig, replace: bool) -> Result<()> {
        let verb = if replace {
            "INSERT OR REPLACE INTO"
        } else {
            "INSERT INTO"
        };
        let synced = serde_json::to_string(&config.synced_journal_ids)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "{verb} sync_configs
                     (id, server_url, username, display_name, enabled, last_sync_at,
                      frequency, wifi_only, sync_attachments, encrypt_data,
                      synced_journal_ids, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    config.id.as_str(),
                    config.server_url,
                    config.username,
                    config.display_name,
                    i32::from(config.enabled),
                    config.last_sync_at,
                    config.frequency.as_str(),
                    i32::from(config.wifi_only),
                    i32::from(config.sync_attachments),
                    i32::from(config.encrypt_data),
                    synced,
                    config.created_at,
                    config.updated_at
                ],
            )?;
            Ok(())
        })
    }
}

impl SyncConfigStore for SqliteSyncConfigStore {
    fn create(&self, config: &SyncConfig) -> Result<()> {
        self.write(config, false)
    }

    fn update(&self, config: &SyncConfig) -> Result<()> {
        let exists = self.get(&config.id)?.is_some();
        if !exists {
            return Err(Error::NotFound(config.id.to_string()));
        }
        self.write(config, true)
    }

    fn delete(&self, id: &SyncConfigId) -> Result<()> {
        self.db.with_tx(|tx| {
            tx.execute(
                "DELETE FROM sync_manifest WHERE config_id = ?",
                params![id.as_str()],
            )?;
            tx.execute(
                "DELETE FROM sync_status WHERE config_id = ?",
                params![id.as_str()],
            )?;
            let rows = tx.execute(
                "DELETE FROM sync_configs WHERE id = ?",
                params![id.as_str()],
            )?;
            if rows == 0 {
                return Err(Error::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    fn get(&self, id: &SyncConfigId) -> Result<Option<SyncConfig>> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                &format!("SELECT {} FROM sync_configs WHERE id = ?", Self::COLUMNS),
                params![id.as_str()],
                Self::parse_config,
            );
            match result {
                Ok(config) => Ok(Some(config)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list(&self) -> Result<Vec<SyncConfig>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM sync_configs ORDER BY created_at",
                Self::COLUMNS
            ))?;
            let configs = stmt
                .query_map([], Self::parse_config)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(configs)
        })
    }

    fn list_enabled(&self) -> Result<Vec<SyncConfig>> {
        Ok(self.list()?.into_iter().filter(|c| c.enabled).collect())
    }
}

/// `SQLite` implementation of [`ManifestStore`]
pub struct SqliteManifestStore {
    db: Arc<Database>,
}

impl SqliteManifestStore {
    /// Create a new store over the shared database
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl ManifestStore for SqliteManifestStore {
    fn load(&self, config_id: &SyncConfigId) -> Result<BTreeMap<EntityKey, ManifestEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT entity_key, remote_path, fingerprint, remote_version, last_synced_at
                 FROM sync_manifest WHERE config_id = ?",
            )?;
            let rows = stmt.query_map(params![config_id.as_str()], |row| {
                let key: String = row.get(0)?;
                Ok((
                    key,
                    ManifestEntry {
                        remote_path: row.get(1)?,
                        fingerprint: row.get(2)?,
                        remote_version: row.get(3)?,
                        last_synced_at: row.get(4)?,
                    },
                ))
            })?;

            let mut manifest = BTreeMap::new();
            for row in rows {
                let (key, entry) = row?;
                manifest.insert(key.parse::<EntityKey>()?, entry);
            }
            Ok(manifest)
        })
    }

    fn save_entry(
        &self,
        config_id: &SyncConfigId,
        key: &EntityKey,
        entry: &ManifestEntry,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sync_manifest
                 (config_id, entity_key, remote_path, fingerprint, remote_version, last_synced_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    config_id.as_str(),
                    key.to_string(),
                    entry.remote_path,
                    entry.fingerprint,
                    entry.remote_version,
                    entry.last_synced_at
                ],
            )?;
            Ok(())
        })
    }

    fn clear(&self, config_id: &SyncConfigId) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sync_manifest WHERE config_id = ?",
                params![config_id.as_str()],
            )?;
            Ok(())
        })
    }
}

/// `SQLite` implementation of [`StatusStore`]
pub struct SqliteStatusStore {
    db: Arc<Database>,
}

impl SqliteStatusStore {
    /// Create a new store over the shared database
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl StatusStore for SqliteStatusStore {
    fn save(&self, status: &SyncStatus) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sync_status
                 (config_id, state, last_attempt_at, progress, message, error_message)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    status.config_id.as_str(),
                    status.state.as_str(),
                    status.last_attempt_at,
                    f64::from(status.progress),
                    status.message,
                    status.error_message
                ],
            )?;
            Ok(())
        })
    }

    fn load(&self, config_id: &SyncConfigId) -> Result<Option<SyncStatus>> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT config_id, state, last_attempt_at, progress, message, error_message
                 FROM sync_status WHERE config_id = ?",
                params![config_id.as_str()],
                |row| {
                    let id: String = row.get(0)?;
                    let state: String = row.get(1)?;
                    let state: SyncState = state.parse().map_err(|e: Error| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    #[allow(clippy::cast_possible_truncation)]
                    let progress = row.get::<_, f64>(3)? as f32;
                    Ok(SyncStatus {
                        config_id: id.parse().unwrap_or_default(),
                        state,
                        last_attempt_at: row.get(2)?,
                        progress,
                        message: row.get(4)?,
                        error_message: row.get(5)?,
                    })
                },
            );
            match result {
                Ok(status) => Ok(Some(status)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttachmentId, SyncState};
    use pretty_assertions::assert_eq;

    fn setup() -> (SqliteSyncConfigStore, SqliteManifestStore, SqliteStatusStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (
            SqliteSyncConfigStore::new(Arc::clone(&db)),
            SqliteManifestStore::new(Arc::clone(&db)),
            SqliteStatusStore::new(db),
        )
    }

    fn sample_config() -> SyncConfig {
        SyncConfig::new("https://dav.example.com", "anna", "Home NAS").unwrap()
    }

    #[test]
    fn test_config_crud() {
        let (configs, _, _) = setup();
        let mut config = sample_config();
        configs.create(&config).unwrap();

        let loaded = configs.get(&config.id).unwrap().unwrap();
        assert_eq!(loaded, config);

        config.enabled = false;
        configs.update(&config).unwrap();
        assert!(configs.list_enabled().unwrap().is_empty());
        assert_eq!(configs.list().unwrap().len(), 1);

        configs.delete(&config.id).unwrap();
        assert!(configs.get(&config.id).unwrap().is_none());
        assert!(configs.delete(&config.id).is_err());
    }

    #[test]
    fn test_update_missing_config_fails() {
        let (configs, _, _) = setup();
        assert!(configs.update(&sample_config()).is_err());
    }

    #[test]
    fn test_manifest_roundtrip_and_replace() {
        let (configs, manifests, _) = setup();
        let config = sample_config();
        configs.create(&config).unwrap();

        let key = EntityKey::Attachment(AttachmentId::new());
        let entry = ManifestEntry::new("journal_app/files/images/a.jpg", "fp1", "v1");
        manifests.save_entry(&config.id, &key, &entry).unwrap();

        let loaded = manifests.load(&config.id).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&key], entry);

        // Entries are replaced wholesale, never field-patched
        let replacement = ManifestEntry::new("journal_app/files/images/a.jpg", "fp2", "v2");
        manifests.save_entry(&config.id, &key, &replacement).unwrap();
        let loaded = manifests.load(&config.id).unwrap();
        assert_eq!(loaded[&key].fingerprint, "fp2");
    }

    #[test]
    fn test_config_delete_cascades_manifest_and_status() {
        let (configs, manifests, statuses) = setup();
        let config = sample_config();
        configs.create(&config).unwrap();

        let key = EntityKey::Attachment(AttachmentId::new());
        manifests
            .save_entry(&config.id, &key, &ManifestEntry::new("p", "f", "v"))
            .unwrap();
        let mut status = SyncStatus::started(config.id);
        status.state = SyncState::Completed;
        statuses.save(&status).unwrap();

        configs.delete(&config.id).unwrap();
        assert!(manifests.load(&config.id).unwrap().is_empty());
        assert!(statuses.load(&config.id).unwrap().is_none());
    }

    #[test]
    fn test_clear_manifest() {
        let (configs, manifests, _) = setup();
        let config = sample_config();
        configs.create(&config).unwrap();

        manifests
            .save_entry(
                &config.id,
                &EntityKey::Attachment(AttachmentId::new()),
                &ManifestEntry::new("p", "f", "v"),
            )
            .unwrap();
        manifests.clear(&config.id).unwrap();
        assert!(manifests.load(&config.id).unwrap().is_empty());
    }

    #[test]
    fn test_status_roundtrip() {
        let (configs, _, statuses) = setup();
        let config = sample_config();
        configs.create(&config).unwrap();

        assert!(statuses.load(&config.id).unwrap().is_none());

        let mut status = SyncStatus::started(config.id);
        status.state = SyncState::Completed;
        status.progress = 1.0;
        status.message = "Synced 3 entities".to_string();
        statuses.save(&status).unwrap();

        let loaded = statuses.load(&config.id).unwrap().unwrap();
        assert_eq!(loaded, status);
    }
}
