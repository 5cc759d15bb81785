//! AWS S3 checkpoint store.
//!
//! Manifests live at `{bucket}/{prefix}/manifest-{mode}.json`; a save is a
//! single PUT, so readers only ever observe whole manifests. The run lock
//! is created with a conditional PUT (`If-None-Match: *`) so two runs
//! racing for the lease cannot both win.

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::Utc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AppError, Result};
use crate::models::{Manifest, SyncMode};
use crate::storage::{manifest_key, CheckpointStore, RunLock, LOCK_KEY};

/// S3-backed checkpoint store.
pub struct S3CheckpointStore {
    client: Client,
    bucket: String,
    prefix: String,
    lease_secs: i64,
}

impl S3CheckpointStore {
    /// Create a new S3 checkpoint store.
    pub fn new(
        client: Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        lease_secs: i64,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            lease_secs,
        }
    }

    /// Create a store from environment configuration.
    pub async fn from_env(lease_secs: i64) -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        let bucket = std::env::var("CHECKPOINT_S3_BUCKET")
            .map_err(|_| AppError::config("CHECKPOINT_S3_BUCKET is not set"))?;
        let prefix =
            std::env::var("CHECKPOINT_S3_PREFIX").unwrap_or_else(|_| "catsync".to_string());

        Ok(Self::new(client, bucket, prefix, lease_secs))
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.prefix.trim_end_matches('/'), name)
    }

    /// Read JSON from S3, mapping a missing key to None.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(AppError::checkpoint)?;
                let value =
                    serde_json::from_slice(&bytes.into_bytes()).map_err(AppError::checkpoint)?;
                Ok(Some(value))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(AppError::checkpoint(service_err))
                }
            }
        }
    }

    /// Write JSON to S3.
    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(AppError::checkpoint)?;
        let bytes = ByteStream::from(json.into_bytes());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(bytes)
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| AppError::checkpoint(e.into_service_error()))?;

        Ok(())
    }

    /// Delete an object, ignoring a missing key.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::checkpoint(e.into_service_error()))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for S3CheckpointStore {
    async fn load_manifest(&self, mode: SyncMode) -> Result<Option<Manifest>> {
        self.read_json(&self.key(&manifest_key(mode))).await
    }

    async fn load_by_handle(&self, handle: &str) -> Result<Option<Manifest>> {
        // Handles are bucket keys, emitted by save_manifest below.
        self.read_json(handle).await
    }

    async fn save_manifest(&self, manifest: &Manifest) -> Result<String> {
        let key = self.key(&manifest_key(manifest.mode));
        self.write_json(&key, manifest).await?;
        log::info!(
            "Wrote manifest to s3://{}/{} ({}/{} batches sent)",
            self.bucket,
            key,
            manifest.total_batches - manifest.unsent_indices().len(),
            manifest.total_batches
        );
        Ok(key)
    }

    async fn clear_manifest(&self, mode: SyncMode) -> Result<()> {
        self.delete_object(&self.key(&manifest_key(mode))).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<RunLock> {
        let key = self.key(LOCK_KEY);

        if let Some(existing) = self.read_json::<RunLock>(&key).await? {
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
            self.delete_object(&key).await?;
        }

        let lock = RunLock::new(holder, self.lease_secs);
        let json = serde_json::to_string_pretty(&lock).map_err(AppError::checkpoint)?;

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(json.into_bytes()))
            .content_type("application/json")
            .if_none_match("*")
            .send()
            .await;

        match result {
            Ok(_) => Ok(lock),
            Err(err) => {
                let service_err = err.into_service_error();
                // Precondition failure: someone else created the lease first
                if service_err
                    .meta()
                    .code()
                    .is_some_and(|code| code == "PreconditionFailed")
                {
                    Err(AppError::RunAlreadyInProgress {
                        holder: "unknown".into(),
                        expires_at: "unknown".into(),
                    })
                } else {
                    Err(AppError::checkpoint(service_err))
                }
            }
        }
    }

    async fn release_lock(&self, lock: &RunLock) -> Result<()> {
        let key = self.key(LOCK_KEY);
        match self.read_json::<RunLock>(&key).await? {
            Some(current) if current.holder == lock.holder => self.delete_object(&key).await,
            Some(current) => {
                log::warn!(
                    "Not releasing run lock: now held by {} instead of {}",
                    current.holder,
                    lock.holder
                );
                Ok(())
            }
            None => Ok(()),
        }
    }
}
