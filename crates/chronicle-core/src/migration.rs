//! One-shot attachment path migration.
//!
//! Rewrites attachment references from legacy absolute paths to the
//! modern, content-organized relative scheme, copying bytes as needed.
//! Runs independently of the sync engine but shares its per-attachment
//! operation locks, because both mutate the same attachment records.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::db::AttachmentRepository;
use crate::error::{Error, Result};
use crate::models::{Attachment, MigrationFailure, MigrationResult, ValidationReport};
use crate::sync::{CancelFlag, OperationLocks};

/// Observer invoked once per attachment processed:
/// `(current, total, status)`. `current` is non-decreasing and `total` is
/// fixed for the run.
pub type MigrationProgressCallback = Box<dyn Fn(usize, usize, &str) + Send + Sync>;

/// The file migration engine. Process-wide singleton run: at most one
/// `migrate_all_files` may be in flight at a time.
pub struct FileMigrator {
    attachments: Arc<dyn AttachmentRepository>,
    locks: Arc<OperationLocks>,
    file_root: PathBuf,
    running: AtomicBool,
    cancel: CancelFlag,
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl FileMigrator {
    /// Migrator over the given attachment store.
    ///
    /// `file_root` is the directory modern relative paths resolve
    /// against; pass the same locks instance the sync service uses.
    #[must_use]
    pub fn new(
        attachments: Arc<dyn AttachmentRepository>,
        locks: Arc<OperationLocks>,
        file_root: PathBuf,
    ) -> Self {
        Self {
            attachments,
            locks,
            file_root,
            running: AtomicBool::new(false),
            cancel: CancelFlag::new(),
        }
    }

    /// Whether at least one attachment still has a legacy path.
    pub fn is_migration_needed(&self) -> Result<bool> {
        Ok(self.migration_count()? > 0)
    }

    /// Count of attachments with legacy paths.
    pub fn migration_count(&self) -> Result<usize> {
        Ok(self
            .attachments
            .list()?
            .iter()
            .filter(|attachment| attachment.is_legacy())
            .count())
    }

    /// Request cancellation of the active run. The in-flight attachment
    /// finishes; the rest are left untouched.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    /// Migrate every legacy attachment to the modern path scheme.
    ///
    /// One bad file never aborts the run: failures are recorded in the
    /// result's error list and the loop continues. With `dry_run` the same
    /// classification and progress cadence happen, but no bytes are copied
    /// and the store is not touched.
    pub async fn migrate_all_files(
        &self,
        on_progress: Option<MigrationProgressCallback>,
        dry_run: bool,
    ) -> Result<MigrationResult> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::MigrationInProgress);
        }
        let _guard = RunningGuard(&self.running);
        self.cancel.reset();

        let started = Instant::now();
        let all = self.attachments.list()?;
        let run_total = all.len();
        info!(total = run_total, dry_run, "starting file migration");

        let mut result = MigrationResult::default();
        let mut processed = 0usize;

        for attachment in all {
            if self.cancel.is_cancelled() {
                info!(processed, "file migration cancelled");
                break;
            }
            processed += 1;

            if !attachment.is_legacy() {
                if let Some(callback) = on_progress.as_ref() {
                    callback(
                        processed,
                        run_total,
                        &format!("Already migrated: {}", attachment.name),
                    );
                }
                result.already_modern += 1;
                continue;
            }

            if let Some(callback) = on_progress.as_ref() {
                callback(
                    processed,
                    run_total,
                    &format!("Migrating: {}", attachment.name),
                );
            }

            if dry_run {
                result.migrated += 1;
                continue;
            }

            let _lock = self.locks.acquire(attachment.id).await;
            match self.migrate_one(&attachment).await {
                Ok(modern) => {
                    debug!(attachment = %attachment.id, path = %modern, "attachment migrated");
                    result.migrated += 1;
                }
                Err(reason) => {
                    warn!(attachment = %attachment.id, reason, "attachment migration failed");
                    result.failed += 1;
                    result.errors.push(MigrationFailure {
                        attachment_id: attachment.id,
                        reason,
                    });
                }
            }
        }

        result.total = processed;
        #[allow(clippy::cast_possible_truncation)]
        {
            result.duration_ms = started.elapsed().as_millis() as u64;
        }
        info!(
            migrated = result.migrated,
            already_modern = result.already_modern,
            failed = result.failed,
            "file migration finished"
        );
        Ok(result)
    }

    /// Copy one legacy attachment's bytes and repoint its record.
    ///
    /// The source is never deleted; it only counts as migrated once the
    /// destination copy is verified present and non-empty and the store
    /// points at the modern path.
    async fn migrate_one(&self, attachment: &Attachment) -> std::result::Result<String, String> {
        let source = PathBuf::from(&attachment.path);
        let modern = attachment.modern_path();
        let dest = self.file_root.join(&modern);

        let source_meta = tokio::fs::metadata(&source)
            .await
            .map_err(|error| format!("source not readable: {error}"))?;
        if !source_meta.is_file() {
            return Err("source is not a regular file".to_string());
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| format!("creating destination directory: {error}"))?;
        }
        if let Err(error) = tokio::fs::copy(&source, &dest).await {
            // Leave no partial file behind
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(format!("copying to {}: {error}", dest.display()));
        }

        let dest_meta = tokio::fs::metadata(&dest)
            .await
            .map_err(|error| format!("verifying destination: {error}"))?;
        if dest_meta.len() == 0 {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err("destination copy is empty".to_string());
        }

        self.attachments
            .update_path(&attachment.id, &modern)
            .map_err(|error| format!("updating store: {error}"))?;
        Ok(modern)
    }

    /// Idempotent audit: can every attachment's path be opened?
    ///
    /// Purely observational; never mutates the store or the filesystem.
    /// This is the tool for detecting post-migration bit rot or external
    /// interference.
    pub async fn validate_migration(&self) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();
        for attachment in self.attachments.list()? {
            report.total += 1;
            let path = if attachment.is_legacy() {
                PathBuf::from(&attachment.path)
            } else {
                self.file_root.join(&attachment.path)
            };
            match tokio::fs::File::open(&path).await {
                Ok(_) => report.accessible += 1,
                Err(error) => {
                    debug!(attachment = %attachment.id, %error, "attachment file inaccessible");
                    report.inaccessible += 1;
                    report
                        .inaccessible_files
                        .push((attachment.id, path.display().to_string()));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        Database, SqliteAttachmentRepository, SqliteEntryRepository, SqliteJournalRepository,
        EntryRepository, JournalRepository,
    };
    use crate::models::{AttachmentKind, Entry, Journal};
    use pretty_assertions::assert_eq;

    // 2024-03-15T12:00:00Z
    const MARCH: i64 = 1_710_504_000_000;

    struct Harness {
        attachments: Arc<SqliteAttachmentRepository>,
        migrator: Arc<FileMigrator>,
        legacy_dir: tempfile::TempDir,
        _file_root: tempfile::TempDir,
        file_root_path: PathBuf,
        entries: Vec<Entry>,
    }

    fn harness(entry_count: usize) -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let journals = SqliteJournalRepository::new(Arc::clone(&db));
        let entry_repo = SqliteEntryRepository::new(Arc::clone(&db));
        let attachments = Arc::new(SqliteAttachmentRepository::new(Arc::clone(&db)));

        let journal = Journal::new("Daily").unwrap();
        journals.insert(&journal).unwrap();
        let mut entries = Vec::new();
        for i in 0..entry_count {
            let mut entry = Entry::new(journal.id, format!("entry {i}"));
            entry.entry_date = MARCH;
            entry_repo.insert(&entry).unwrap();
            entries.push(entry);
        }

        let legacy_dir = tempfile::tempdir().unwrap();
        let file_root = tempfile::tempdir().unwrap();
        let file_root_path = file_root.path().to_path_buf();
        let migrator = Arc::new(FileMigrator::new(
            Arc::clone(&attachments) as Arc<dyn AttachmentRepository>,
            Arc::new(OperationLocks::new()),
            file_root_path.clone(),
        ));

        Harness {
            attachments,
            migrator,
            legacy_dir,
            _file_root: file_root,
            file_root_path,
            entries,
        }
    }

    impl Harness {
        /// Legacy attachment whose absolute source file exists iff
        /// `with_file`.
        fn add_legacy(&self, entry: &Entry, name: &str, with_file: bool) -> Attachment {
            let source = self.legacy_dir.path().join(name);
            if with_file {
                std::fs::write(&source, b"legacy bytes").unwrap();
            }
            let mut attachment = Attachment::new(
                entry.id,
                AttachmentKind::Photo,
                name,
                source.to_string_lossy(),
                12,
                "image/jpeg",
            )
            .unwrap();
            attachment.created_at = MARCH;
            self.attachments.insert(&attachment).unwrap();
            attachment
        }

        /// Attachment already on a modern path, with its file in place.
        fn add_modern(&self, entry: &Entry, name: &str) -> Attachment {
            let mut attachment = Attachment::new(
                entry.id,
                AttachmentKind::Photo,
                name,
                "placeholder",
                12,
                "image/jpeg",
            )
            .unwrap();
            attachment.created_at = MARCH;
            attachment.path = attachment.modern_path();
            self.attachments.insert(&attachment).unwrap();

            let dest = self.file_root_path.join(&attachment.path);
            std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
            std::fs::write(dest, b"modern bytes").unwrap();
            attachment
        }
    }

    #[tokio::test]
    async fn test_scenario_five_entries_three_attachments_legacy_ratio() {
        // 5 entries x 3 attachments, 12 legacy / 3 modern
        let h = harness(5);
        let mut made = 0;
        for entry in &h.entries {
            for i in 0..3 {
                if made < 12 {
                    h.add_legacy(entry, &format!("legacy-{made}-{i}.jpg"), true);
                } else {
                    h.add_modern(entry, &format!("modern-{made}-{i}.jpg"));
                }
                made += 1;
            }
        }
        assert_eq!(h.migrator.migration_count().unwrap(), 12);
        assert!(h.migrator.is_migration_needed().unwrap());

        let result = h.migrator.migrate_all_files(None, false).await.unwrap();
        assert_eq!(result.total, 15);
        assert_eq!(result.migrated, 12);
        assert_eq!(result.already_modern, 3);
        assert_eq!(result.failed, 0);
        assert!((result.success_rate() - 1.0).abs() < f64::EPSILON);
        assert!(result.is_complete());
        assert!(!result.has_errors());

        // Migration monotonicity: nothing legacy survives a clean run
        assert_eq!(h.migrator.migration_count().unwrap(), 0);
        assert!(!h.migrator.is_migration_needed().unwrap());
        for attachment in h.attachments.list().unwrap() {
            assert!(!attachment.is_legacy());
            assert!(h.file_root_path.join(&attachment.path).is_file());
        }
    }

    #[tokio::test]
    async fn test_scenario_missing_sources_fail_without_aborting() {
        // 6 legacy attachments, source files exist for only 3
        let h = harness(1);
        let entry = &h.entries[0];
        for i in 0..3 {
            h.add_legacy(entry, &format!("present-{i}.jpg"), true);
        }
        let mut missing = Vec::new();
        for i in 0..3 {
            missing.push(h.add_legacy(entry, &format!("missing-{i}.jpg"), false));
        }

        let result = h.migrator.migrate_all_files(None, false).await.unwrap();
        assert_eq!(result.total, 6);
        assert_eq!(result.migrated, 3);
        assert_eq!(result.failed, 3);
        assert!((result.success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(result.errors.len(), 3);
        assert!(result.is_complete());
        assert!(result.has_errors());

        // Legacy survivors are exactly the ones in the error list
        let failed_ids: Vec<_> = result.errors.iter().map(|e| e.attachment_id).collect();
        for attachment in h.attachments.list().unwrap() {
            assert_eq!(attachment.is_legacy(), failed_ids.contains(&attachment.id));
        }
        for attachment in &missing {
            assert!(failed_ids.contains(&attachment.id));
        }
    }

    #[tokio::test]
    async fn test_dry_run_is_pure() {
        let h = harness(1);
        let entry = &h.entries[0];
        for i in 0..4 {
            h.add_legacy(entry, &format!("legacy-{i}.jpg"), true);
        }
        h.add_modern(entry, "modern.jpg");

        let count_before = h.migrator.migration_count().unwrap();
        let rows_before = h.attachments.list().unwrap();

        let result = h.migrator.migrate_all_files(None, true).await.unwrap();
        assert_eq!(result.total, 5);
        assert_eq!(result.migrated, 4);
        assert_eq!(result.already_modern, 1);
        assert_eq!(result.failed, 0);

        // Store and filesystem byte-for-byte unchanged
        assert_eq!(h.migrator.migration_count().unwrap(), count_before);
        assert_eq!(h.attachments.list().unwrap(), rows_before);
        for attachment in &rows_before {
            if attachment.is_legacy() {
                assert!(!h.file_root_path.join(attachment.modern_path()).exists());
            }
        }
    }

    #[tokio::test]
    async fn test_progress_cadence_is_monotonic_with_fixed_total() {
        let h = harness(1);
        let entry = &h.entries[0];
        for i in 0..5 {
            h.add_legacy(entry, &format!("legacy-{i}.jpg"), true);
        }

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_progress: MigrationProgressCallback = Box::new(move |current, total, _status| {
            sink.lock().unwrap().push((current, total));
        });

        h.migrator
            .migrate_all_files(Some(on_progress), false)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        for (i, (current, total)) in seen.iter().enumerate() {
            assert_eq!(*current, i + 1);
            assert_eq!(*total, 5);
        }
    }

    #[tokio::test]
    async fn test_cancellation_leaves_remainder_untouched() {
        // Scenario: cancel after 2 of 10 migrated
        let h = harness(1);
        let entry = &h.entries[0];
        let mut attachments = Vec::new();
        for i in 0..10 {
            attachments.push(h.add_legacy(entry, &format!("legacy-{i}.jpg"), true));
        }

        let migrator = Arc::clone(&h.migrator);
        let on_progress: MigrationProgressCallback = Box::new(move |current, _total, _status| {
            if current == 2 {
                // In-flight attachment finishes; the rest are skipped
                migrator.request_cancel();
            }
        });

        let result = h
            .migrator
            .migrate_all_files(Some(on_progress), false)
            .await
            .unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.migrated, 2);
        assert_eq!(result.failed, 0);
        assert!(result.is_complete());

        let remaining = h.migrator.migration_count().unwrap();
        assert_eq!(remaining, 8);
        // No partial file present at any destination of the untouched 8
        for attachment in h.attachments.list().unwrap() {
            if attachment.is_legacy() {
                assert!(!h.file_root_path.join(attachment.modern_path()).exists());
            }
        }
    }

    #[tokio::test]
    async fn test_validation_counts_inaccessible_files() {
        let h = harness(1);
        let entry = &h.entries[0];
        h.add_modern(entry, "ok.jpg");
        let broken = h.add_modern(entry, "rotted.jpg");
        std::fs::remove_file(h.file_root_path.join(&broken.path)).unwrap();
        h.add_legacy(entry, "still-legacy.jpg", true);

        let report = h.migrator.validate_migration().await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.accessible, 2);
        assert_eq!(report.inaccessible, 1);
        assert_eq!(report.inaccessible_files.len(), 1);
        assert_eq!(report.inaccessible_files[0].0, broken.id);
        assert!((report.success_rate() - 2.0 / 3.0).abs() < f64::EPSILON);

        // Idempotent and purely observational
        let again = h.migrator.validate_migration().await.unwrap();
        assert_eq!(again, report);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_run_is_rejected() {
        let h = harness(1);
        let entry = &h.entries[0];
        for i in 0..5 {
            h.add_legacy(entry, &format!("legacy-{i}.jpg"), true);
        }

        let slow: MigrationProgressCallback = Box::new(|_, _, _| {
            std::thread::sleep(std::time::Duration::from_millis(40));
        });
        let first = {
            let migrator = Arc::clone(&h.migrator);
            tokio::spawn(async move { migrator.migrate_all_files(Some(slow), false).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        let error = h.migrator.migrate_all_files(None, false).await.unwrap_err();
        assert!(matches!(error, Error::MigrationInProgress));

        let result = first.await.unwrap().unwrap();
        assert_eq!(result.migrated, 5);
    }

    #[tokio::test]
    async fn test_empty_store_is_vacuously_successful() {
        let h = harness(0);
        let result = h.migrator.migrate_all_files(None, false).await.unwrap();
        assert_eq!(result.total, 0);
        assert!((result.success_rate() - 1.0).abs() < f64::EPSILON);
        assert!(result.is_complete());

        let report = h.migrator.validate_migration().await.unwrap();
        assert_eq!(report.total, 0);
    }
}
