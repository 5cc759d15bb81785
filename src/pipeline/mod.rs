//! Pipeline entry points for sync operations.
//!
//! - `run_sync`: Execute one sync run and notify the result
//! - `run_inspect`: Interrogate the persisted manifest

mod assemble;
mod inspect;
mod sync;

pub use assemble::{assemble, partition_batches, AssemblyRules};
pub use inspect::{run_inspect, InspectMode};
pub use sync::SyncEngine;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{Config, RunRequest, SyncResult, SyncStatus};
use crate::services::{CatalogSource, Notifier, TargetClient};
use crate::storage::CheckpointStore;
use crate::utils::log;
use crate::utils::rate_limit::RateLimiter;

/// Run one sync to completion and deliver exactly one result notification.
///
/// Returns `Err` only for invocation failures (lock already held, unknown
/// resume handle, unusable configuration) — those never started a run, so
/// nothing is notified.
pub async fn run_sync(
    config: Arc<Config>,
    store: Arc<dyn CheckpointStore>,
    request: RunRequest,
    cancel: CancellationToken,
) -> Result<SyncResult> {
    log::header("Catalog sync");

    // One ceiling shared by every upstream and downstream client.
    let limiter = Arc::new(RateLimiter::per_minute(config.sync.requests_per_minute));
    let source = Arc::new(CatalogSource::new(config.clone(), limiter.clone())?);
    let target = Arc::new(TargetClient::new(config.clone(), limiter)?);
    let notifier = Notifier::new(&config.notify)?;
    let engine = SyncEngine::new(config.clone(), store, source, target, cancel);

    log::step(1, 2, "Sync - Fetching, assembling and sending batches");
    let result = engine.run(request).await?;

    log::step(2, 2, "Notify - Reporting the run result");
    notifier.notify(&result).await;

    log::summary(
        "Sync run",
        &[
            ("status", format!("{:?}", result.status)),
            ("mode", result.mode.to_string()),
            ("products_synced", result.products_synced.to_string()),
            ("failed_batches", format!("{:?}", result.failed_batches)),
            ("rejected_records", result.rejections.len().to_string()),
            (
                "recover_with",
                result.resume_command().unwrap_or_else(|| "-".into()),
            ),
        ],
    );

    match result.status {
        SyncStatus::Succeeded | SyncStatus::NoUpdates => log::success("Sync complete"),
        SyncStatus::PartiallyFailed => log::warn("Sync completed with failed batches"),
        SyncStatus::Failed => log::error("Sync failed"),
    }

    Ok(result)
}
