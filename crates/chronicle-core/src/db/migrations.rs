//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        -- Journals
        CREATE TABLE IF NOT EXISTS journals (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            color TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        );

        -- Entries
        CREATE TABLE IF NOT EXISTS entries (
            id TEXT PRIMARY KEY,
            journal_id TEXT NOT NULL REFERENCES journals(id),
            title TEXT,
            body TEXT NOT NULL,
            entry_date INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_entries_journal ON entries(journal_id, entry_date);
        CREATE INDEX IF NOT EXISTS idx_entries_updated ON entries(updated_at DESC);

        -- Attachments
        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL REFERENCES entries(id),
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_attachments_entry ON attachments(entry_id);

        -- Sync configurations
        CREATE TABLE IF NOT EXISTS sync_configs (
            id TEXT PRIMARY KEY,
            server_url TEXT NOT NULL,
            username TEXT NOT NULL,
            display_name TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            last_sync_at INTEGER,
            frequency TEXT NOT NULL,
            wifi_only INTEGER NOT NULL DEFAULT 0,
            sync_attachments INTEGER NOT NULL DEFAULT 1,
            encrypt_data INTEGER NOT NULL DEFAULT 0,
            synced_journal_ids TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Per-config manifest of last-synchronized entity state
        CREATE TABLE IF NOT EXISTS sync_manifest (
            config_id TEXT NOT NULL REFERENCES sync_configs(id) ON DELETE CASCADE,
            entity_key TEXT NOT NULL,
            remote_path TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            remote_version TEXT NOT NULL,
            last_synced_at INTEGER NOT NULL,
            PRIMARY KEY (config_id, entity_key)
        );

        -- Last terminal sync status per config, for display
        CREATE TABLE IF NOT EXISTS sync_status (
            config_id TEXT PRIMARY KEY REFERENCES sync_configs(id) ON DELETE CASCADE,
            state TEXT NOT NULL,
            last_attempt_at INTEGER NOT NULL,
            progress REAL NOT NULL,
            message TEXT NOT NULL,
            error_message TEXT
        );

        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;

    Ok(())
}
