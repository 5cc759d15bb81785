//! Sync run data structures: modes, batches, results, notification payload.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::ProductRecord;

/// Scope of a sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Incremental,
    Full,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Incremental => write!(f, "incremental"),
            SyncMode::Full => write!(f, "full"),
        }
    }
}

/// The three ways a run can be invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    Incremental,
    Full,
    Resume { handle: String },
}

/// Delivery state of one batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Sent,
    Failed,
}

/// An ordered, bounded-size slice of records submitted as one unit.
///
/// Immutable once constructed; only `status` transitions.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Position within the run
    pub index: usize,
    pub records: Vec<ProductRecord>,
    pub status: BatchStatus,
}

impl Batch {
    pub fn new(index: usize, records: Vec<ProductRecord>) -> Self {
        Self {
            index,
            records,
            status: BatchStatus::Pending,
        }
    }

    /// Source record identifiers, in batch order.
    pub fn record_ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.sku.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Succeeded,
    PartiallyFailed,
    Failed,
    /// Incremental run that found nothing to sync; a success, not an alarm
    NoUpdates,
}

/// A record the target accepted the batch for but rejected individually.
///
/// Rejections are data-level validation failures, never retried; surfaced
/// for operator diagnostics only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordRejection {
    pub batch_index: usize,
    pub sku: String,
    pub reason: String,
}

/// Outcome summary of one run, handed to the notifier and then discarded.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub status: SyncStatus,
    pub mode: SyncMode,
    pub products_synced: usize,
    pub failed_batches: Vec<usize>,
    pub rejections: Vec<RecordRejection>,
    /// Manifest handle, present whenever batches remain to recover
    pub resume_handle: Option<String>,
    /// Cause of a `Failed` run, for logs; not part of the payload
    pub failure: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl SyncResult {
    /// A run that aborted before or during fetch/assembly.
    pub fn failed(mode: SyncMode, failure: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Failed,
            mode,
            products_synced: 0,
            failed_batches: Vec::new(),
            rejections: Vec::new(),
            resume_handle: None,
            failure: Some(failure.into()),
            completed_at: Utc::now(),
        }
    }

    /// An incremental window with no changed products.
    pub fn no_updates(mode: SyncMode) -> Self {
        Self {
            status: SyncStatus::NoUpdates,
            mode,
            products_synced: 0,
            failed_batches: Vec::new(),
            rejections: Vec::new(),
            resume_handle: None,
            failure: None,
            completed_at: Utc::now(),
        }
    }

    /// The operator instruction for recovering this run, if recovery applies.
    pub fn resume_command(&self) -> Option<String> {
        match self.status {
            SyncStatus::Succeeded | SyncStatus::NoUpdates => None,
            SyncStatus::PartiallyFailed => self
                .resume_handle
                .as_ref()
                .map(|handle| format!("catsync resume {handle}")),
            SyncStatus::Failed => Some(match self.mode {
                SyncMode::Full => "catsync sync --full".to_string(),
                SyncMode::Incremental => "catsync sync".to_string(),
            }),
        }
    }

    /// Build the fixed webhook payload for this result.
    pub fn payload(&self) -> NotificationPayload {
        NotificationPayload {
            status: match self.status {
                SyncStatus::Succeeded => PayloadStatus::Success,
                SyncStatus::NoUpdates => PayloadStatus::NoUpdates,
                SyncStatus::PartiallyFailed | SyncStatus::Failed => PayloadStatus::Failure,
            },
            sync_type: self.mode,
            products_synced: self.products_synced,
            failed_batches: self.failed_batches.clone(),
            resume_command: self.resume_command(),
            timestamp: self
                .completed_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Three-valued status of the notification payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayloadStatus {
    Success,
    Failure,
    NoUpdates,
}

/// The fixed JSON object delivered to the result webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub status: PayloadStatus,
    pub sync_type: SyncMode,
    pub products_synced: usize,
    pub failed_batches: Vec<usize>,
    pub resume_command: Option<String>,
    pub timestamp: String,
}
