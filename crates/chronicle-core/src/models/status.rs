//! Sync run status model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::sync_config::SyncConfigId;

/// The phase a sync run is in.
///
/// `Idle` is both the initial state and the terminal state at rest;
/// `Failed` and `Cancelled` are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No run active
    #[default]
    Idle,
    /// Connecting and computing deltas
    Checking,
    /// Pushing local changes
    Uploading,
    /// Pulling remote changes
    Downloading,
    /// Run finished; per-entity errors may still be present
    Completed,
    /// Run aborted by a fatal error
    Failed,
    /// Run stopped by explicit cancellation
    Cancelled,
}

impl SyncState {
    /// Whether a run in this state has finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Completed | Self::Failed | Self::Cancelled
        )
    }

    /// Stable name used for database storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Uploading => "uploading",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SyncState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(Self::Idle),
            "checking" => Ok(Self::Checking),
            "uploading" => Ok(Self::Uploading),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::InvalidInput(format!("Unknown sync state: {other}"))),
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one sync configuration's current or last run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// The configuration this status belongs to.
    pub config_id: SyncConfigId,
    /// Current phase.
    pub state: SyncState,
    /// When the run started (Unix ms).
    pub last_attempt_at: i64,
    /// Fraction of entities processed, in `[0, 1]`.
    pub progress: f32,
    /// Human-readable description of the current step.
    pub message: String,
    /// Error summary; set on `Failed`, and on `Completed` with
    /// per-entity errors.
    pub error_message: Option<String>,
}

impl SyncStatus {
    /// Status for a config with no run recorded.
    #[must_use]
    pub fn idle(config_id: SyncConfigId) -> Self {
        Self {
            config_id,
            state: SyncState::Idle,
            last_attempt_at: 0,
            progress: 0.0,
            message: String::new(),
            error_message: None,
        }
    }

    /// Status at the start of a run.
    #[must_use]
    pub fn started(config_id: SyncConfigId) -> Self {
        Self {
            config_id,
            state: SyncState::Checking,
            last_attempt_at: chrono::Utc::now().timestamp_millis(),
            progress: 0.0,
            message: "Connecting".to_string(),
            error_message: None,
        }
    }
}
