//! The checkpoint manifest: durable batch-level progress of a sync run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::run::{Batch, BatchStatus, SyncMode};

/// Durable record of one batch's identity and delivery state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchDescriptor {
    pub index: usize,
    pub status: BatchStatus,
    pub size: usize,

    /// Source record identifiers, enough to rebuild the batch on resume
    pub record_ids: Vec<String>,

    pub sent_at: Option<DateTime<Utc>>,
}

/// The durable representation of a run's progress.
///
/// Owned exclusively by the checkpoint store; the orchestrator requests
/// reads and writes through the store's interface and never mutates a
/// persisted manifest in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub mode: SyncMode,

    /// Changed-since cutoff of the run; absent for full syncs
    pub cutoff: Option<DateTime<Utc>>,

    /// SHA-256 over the ordered record identifiers of the whole run.
    /// A resumed run must rebuild to the same value or the stored batch
    /// indices cannot be trusted.
    pub fingerprint: String,

    pub total_products: usize,
    pub total_batches: usize,
    pub batches: Vec<BatchDescriptor>,

    /// Highest batch index confirmed sent; `None` until the first send
    pub highest_sent_index: Option<usize>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Manifest {
    /// Create a fresh manifest for a newly partitioned run.
    pub fn for_run(mode: SyncMode, cutoff: Option<DateTime<Utc>>, batches: &[Batch]) -> Self {
        let now = Utc::now();
        Self {
            mode,
            cutoff,
            fingerprint: Self::fingerprint_of(batches),
            total_products: batches.iter().map(Batch::len).sum(),
            total_batches: batches.len(),
            batches: batches
                .iter()
                .map(|b| BatchDescriptor {
                    index: b.index,
                    status: b.status,
                    size: b.len(),
                    record_ids: b.record_ids(),
                    sent_at: None,
                })
                .collect(),
            highest_sent_index: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Content fingerprint of a partitioned record set.
    pub fn fingerprint_of(batches: &[Batch]) -> String {
        let mut hasher = Sha256::new();
        for batch in batches {
            for record in &batch.records {
                hasher.update(record.sku.as_bytes());
                hasher.update(b"\n");
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Record the outcome of one batch attempt.
    pub fn mark(&mut self, index: usize, status: BatchStatus, sent_at: Option<DateTime<Utc>>) {
        if let Some(descriptor) = self.batches.iter_mut().find(|b| b.index == index) {
            descriptor.status = status;
            descriptor.sent_at = sent_at;
        }
        if status == BatchStatus::Sent {
            self.highest_sent_index = Some(
                self.highest_sent_index
                    .map_or(index, |current| current.max(index)),
            );
        }
        self.updated_at = Utc::now();
    }

    /// Indices of batches marked failed, in order.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Failed)
            .map(|b| b.index)
            .collect()
    }

    /// Indices still needing delivery: everything not confirmed sent.
    pub fn unsent_indices(&self) -> Vec<usize> {
        self.batches
            .iter()
            .filter(|b| b.status != BatchStatus::Sent)
            .map(|b| b.index)
            .collect()
    }

    /// Whether every batch has been confirmed sent.
    pub fn is_complete(&self) -> bool {
        self.batches.iter().all(|b| b.status == BatchStatus::Sent)
    }
}
