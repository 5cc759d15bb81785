//! Local filesystem checkpoint store.
//!
//! Manifests are JSON files replaced atomically (write to temp, then
//! rename) so a crashed writer never leaves a torn manifest behind. The
//! run lock is a lease file created with `create_new`; an expired lease is
//! treated as abandoned and taken over.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{Manifest, SyncMode};
use crate::storage::{manifest_key, CheckpointStore, RunLock, LOCK_KEY};

/// Checkpoint store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalCheckpointStore {
    root_dir: PathBuf,
    lease_secs: i64,
}

impl LocalCheckpointStore {
    /// Create a store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>, lease_secs: i64) -> Self {
        Self {
            root_dir: root_dir.into(),
            lease_secs,
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(AppError::checkpoint)?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &PathBuf, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(AppError::checkpoint)?;
        file.write_all(bytes).await.map_err(AppError::checkpoint)?;
        file.flush().await.map_err(AppError::checkpoint)?;
        drop(file);

        tokio::fs::rename(&tmp, path)
            .await
            .map_err(AppError::checkpoint)?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize>(&self, path: &PathBuf, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(AppError::checkpoint)?;
        self.write_bytes(path, &bytes).await
    }

    /// Read JSON data, returning None if the file doesn't exist.
    async fn read_json<T: DeserializeOwned>(&self, path: &PathBuf) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(AppError::checkpoint)?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::checkpoint(e)),
        }
    }
}

#[async_trait]
impl CheckpointStore for LocalCheckpointStore {
    async fn load_manifest(&self, mode: SyncMode) -> Result<Option<Manifest>> {
        self.read_json(&self.path(&manifest_key(mode))).await
    }

    async fn load_by_handle(&self, handle: &str) -> Result<Option<Manifest>> {
        self.read_json(&PathBuf::from(handle)).await
    }

    async fn save_manifest(&self, manifest: &Manifest) -> Result<String> {
        let path = self.path(&manifest_key(manifest.mode));
        self.write_json(&path, manifest).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn clear_manifest(&self, mode: SyncMode) -> Result<()> {
        let path = self.path(&manifest_key(mode));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::checkpoint(e)),
        }
    }

    async fn acquire_lock(&self, holder: &str) -> Result<RunLock> {
        let path = self.path(LOCK_KEY);

        if let Some(existing) = self.read_json::<RunLock>(&path).await? {
            if !existing.is_expired(Utc::now()) {
                return Err(AppError::RunAlreadyInProgress {
                    holder: existing.holder,
                    expires_at: existing.expires_at.to_rfc3339(),
                });
            }
            log::warn!(
                "Taking over expired run lock held by {} (expired {})",
                existing.holder,
                existing.expires_at
            );
            tokio::fs::remove_file(&path)
                .await
                .map_err(AppError::checkpoint)?;
        }

        self.ensure_dir(&path).await?;
        let lock = RunLock::new(holder, self.lease_secs);
        let bytes = serde_json::to_vec_pretty(&lock).map_err(AppError::checkpoint)?;

        // create_new so two runs racing for the lock cannot both win
        let mut file = match tokio::fs::File::options()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(AppError::RunAlreadyInProgress {
                    holder: "unknown".into(),
                    expires_at: "unknown".into(),
                });
            }
            Err(e) => return Err(AppError::checkpoint(e)),
        };
        file.write_all(&bytes).await.map_err(AppError::checkpoint)?;
        file.flush().await.map_err(AppError::checkpoint)?;

        Ok(lock)
    }

    async fn release_lock(&self, lock: &RunLock) -> Result<()> {
        let path = self.path(LOCK_KEY);
        match self.read_json::<RunLock>(&path).await? {
            Some(current) if current.holder == lock.holder => {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(AppError::checkpoint)?;
            }
            Some(current) => {
                log::warn!(
                    "Not releasing run lock: now held by {} instead of {}",
                    current.holder,
                    lock.holder
                );
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Batch, BatchStatus, ProductRecord, Visibility};

    fn make_manifest(mode: SyncMode) -> Manifest {
        let records: Vec<ProductRecord> = (0..3)
            .map(|i| ProductRecord {
                id: i,
                sku: format!("SKU-{i}"),
                title: format!("Product {i}"),
                description: String::new(),
                status: Visibility::Visible,
                price: Some(5.0),
                currency: Some("GBP".into()),
                brand: None,
                url: None,
                image_url: None,
                categories: vec![],
                features: Default::default(),
                updated_at: "2026-08-01T09:00:00Z".into(),
            })
            .collect();
        let batches = vec![Batch::new(0, records)];
        Manifest::for_run(mode, None, &batches)
    }

    #[tokio::test]
    async fn save_load_clear_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCheckpointStore::new(dir.path(), 600);

        assert!(store.load_manifest(SyncMode::Full).await.unwrap().is_none());

        let manifest = make_manifest(SyncMode::Full);
        let handle = store.save_manifest(&manifest).await.unwrap();

        let loaded = store.load_manifest(SyncMode::Full).await.unwrap().unwrap();
        assert_eq!(loaded, manifest);

        let by_handle = store.load_by_handle(&handle).await.unwrap().unwrap();
        assert_eq!(by_handle, manifest);

        store.clear_manifest(SyncMode::Full).await.unwrap();
        assert!(store.load_manifest(SyncMode::Full).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_missing_manifest_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCheckpointStore::new(dir.path(), 600);
        assert!(store.clear_manifest(SyncMode::Incremental).await.is_ok());
    }

    #[tokio::test]
    async fn save_overwrites_previous_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCheckpointStore::new(dir.path(), 600);

        let mut manifest = make_manifest(SyncMode::Incremental);
        store.save_manifest(&manifest).await.unwrap();

        manifest.mark(0, BatchStatus::Sent, Some(Utc::now()));
        store.save_manifest(&manifest).await.unwrap();

        let loaded = store
            .load_manifest(SyncMode::Incremental)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.highest_sent_index, Some(0));
    }

    #[tokio::test]
    async fn second_lock_acquisition_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCheckpointStore::new(dir.path(), 600);

        let _lock = store.acquire_lock("run-a").await.unwrap();
        let second = store.acquire_lock("run-b").await;
        assert!(matches!(
            second,
            Err(AppError::RunAlreadyInProgress { .. })
        ));
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCheckpointStore::new(dir.path(), -1);

        let _stale = store.acquire_lock("dead-run").await.unwrap();

        // Lease duration is negative, so the first lock is already expired.
        let fresh = LocalCheckpointStore::new(dir.path(), 600)
            .acquire_lock("new-run")
            .await
            .unwrap();
        assert_eq!(fresh.holder, "new-run");
    }

    #[tokio::test]
    async fn release_makes_lock_available_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCheckpointStore::new(dir.path(), 600);

        let lock = store.acquire_lock("run-a").await.unwrap();
        store.release_lock(&lock).await.unwrap();

        assert!(store.acquire_lock("run-b").await.is_ok());
    }
}
