//! Checkpoint persistence for sync runs.
//!
//! The store owns manifest durability and the exclusive run lock. The
//! orchestrator only requests reads and writes through the
//! [`CheckpointStore`] trait; a manifest on disk (or in the bucket) is the
//! durable failure record that makes a run resumable.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//! ├── manifest-incremental.json   # checkpoint of the last incremental run
//! ├── manifest-full.json          # checkpoint of the last full run
//! └── run.lock                    # lease held by the active run
//! ```

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Manifest, SyncMode};

// Re-export for convenience
pub use local::LocalCheckpointStore;

/// Storage key of the manifest for a run mode.
pub fn manifest_key(mode: SyncMode) -> String {
    format!("manifest-{mode}.json")
}

/// Storage key of the run lock lease.
pub const LOCK_KEY: &str = "run.lock";

/// The lease written to the lock key while a run is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunLock {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RunLock {
    pub fn new(holder: &str, lease_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(lease_secs),
        }
    }

    /// An expired lease belongs to a run that died without releasing it.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Trait for checkpoint storage backends.
///
/// Every method maps backend failures to `CheckpointUnavailable`; the
/// orchestrator treats that as fatal since progress cannot be trusted
/// without the store.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the most recent manifest for a run mode, if any.
    async fn load_manifest(&self, mode: SyncMode) -> Result<Option<Manifest>>;

    /// Load a manifest by its opaque handle (as carried in a resume command).
    async fn load_by_handle(&self, handle: &str) -> Result<Option<Manifest>>;

    /// Durably overwrite the stored manifest; returns its handle.
    ///
    /// Atomic: a reader never observes a half-written manifest.
    async fn save_manifest(&self, manifest: &Manifest) -> Result<String>;

    /// Remove the manifest for a run mode after full success.
    async fn clear_manifest(&self, mode: SyncMode) -> Result<()>;

    /// Take the exclusive run lock, failing fast with
    /// `RunAlreadyInProgress` if an unexpired lease is held elsewhere.
    async fn acquire_lock(&self, holder: &str) -> Result<RunLock>;

    /// Release a lock taken by `acquire_lock`. Best-effort on shutdown.
    async fn release_lock(&self, lock: &RunLock) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_keys_are_mode_scoped() {
        assert_eq!(manifest_key(SyncMode::Incremental), "manifest-incremental.json");
        assert_eq!(manifest_key(SyncMode::Full), "manifest-full.json");
    }

    #[test]
    fn lease_expiry() {
        let lock = RunLock::new("worker-1", 600);
        assert!(!lock.is_expired(Utc::now()));
        assert!(lock.is_expired(Utc::now() + chrono::Duration::seconds(601)));
    }
}
