//! File migration result models

use serde::{Deserialize, Serialize};

use super::attachment::AttachmentId;

/// One attachment that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFailure {
    /// The attachment left in its legacy state.
    pub attachment_id: AttachmentId,
    /// What went wrong.
    pub reason: String,
}

/// Summary of one `migrate_all_files` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MigrationResult {
    /// Attachments examined.
    pub total: usize,
    /// Legacy attachments successfully rewritten to modern paths.
    pub migrated: usize,
    /// Attachments that already had modern paths (no I/O performed).
    pub already_modern: usize,
    /// Legacy attachments that could not be migrated.
    pub failed: usize,
    /// One record per failed attachment.
    pub errors: Vec<MigrationFailure>,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl MigrationResult {
    /// Fraction of attempted migrations that succeeded:
    /// `migrated / (migrated + failed)`.
    ///
    /// Already-modern attachments need no work and don't dilute the rate.
    /// Defined as `1.0` when nothing needed migration: an empty run is
    /// vacuously successful.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let attempted = self.migrated + self.failed;
        if attempted == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.migrated as f64 / attempted as f64;
        rate
    }

    /// Whether any attachment failed to migrate.
    #[must_use]
    pub const fn has_errors(&self) -> bool {
        self.failed > 0
    }

    /// Whether every examined attachment is accounted for.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.migrated + self.already_modern + self.failed == self.total
    }
}

/// Outcome of an idempotent `validate_migration` pass.
///
/// Purely observational: counts whether every attachment's path resolves to
/// a readable file. Never mutates state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValidationReport {
    /// Attachments examined.
    pub total: usize,
    /// Attachments whose path resolved to a readable file.
    pub accessible: usize,
    /// Attachments whose path did not resolve.
    pub inaccessible: usize,
    /// The unresolved attachments and the paths that failed.
    pub inaccessible_files: Vec<(AttachmentId, String)>,
}

impl ValidationReport {
    /// Fraction of attachments whose files are accessible (`1.0` when
    /// there are none).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.accessible as f64 / self.total as f64;
        rate
    }
}
