//! Sync orchestration.
//!
//! The state machine tying the engine together:
//! Starting → Fetching → Assembling → SendingBatches → Finalizing.
//!
//! One sequential control flow per run. The run lock is acquired before
//! anything else; the cutoff is computed once at start and threaded as a
//! value; the manifest is saved after every batch attempt so the last
//! durable state always reflects reality. A batch-level failure is
//! recorded and iteration continues, so one bad batch cannot block
//! unrelated products from syncing. A checkpoint failure aborts
//! immediately: progress cannot be trusted without the store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{
    Batch, BatchStatus, Config, Manifest, RunRequest, SyncMode, SyncResult, SyncStatus,
};
use crate::services::{BatchSink, CatalogFeed, FetchScope};
use crate::storage::CheckpointStore;
use crate::utils::retry::{with_retry, RetryPolicy};

use super::assemble::{assemble, partition_batches, AssemblyRules};

/// Resolved scope of a run: what to fetch and what progress to restore.
struct RunScope {
    mode: SyncMode,
    cutoff: Option<DateTime<Utc>>,
    prior: Option<Manifest>,
}

/// The batch product synchronization engine.
pub struct SyncEngine {
    config: Arc<Config>,
    store: Arc<dyn CheckpointStore>,
    source: Arc<dyn CatalogFeed>,
    target: Arc<dyn BatchSink>,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn CheckpointStore>,
        source: Arc<dyn CatalogFeed>,
        target: Arc<dyn BatchSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            source,
            target,
            cancel,
        }
    }

    /// Execute one run to its terminal state.
    ///
    /// Invocation-level failures (lock held elsewhere, unknown resume
    /// handle) return `Err` — no run started, nothing to report. Once the
    /// scope is resolved, every failure terminates in a `SyncResult` so
    /// the caller can emit exactly one notification per run.
    pub async fn run(&self, request: RunRequest) -> Result<SyncResult> {
        let holder = format!("catsync-{}", std::process::id());
        let lock = self.store.acquire_lock(&holder).await?;

        let scope = match self.resolve_scope(&request).await {
            Ok(scope) => scope,
            Err(error) => {
                let _ = self.store.release_lock(&lock).await;
                return Err(error);
            }
        };
        let mode = scope.mode;

        let outcome = self.execute(scope).await;

        if let Err(error) = self.store.release_lock(&lock).await {
            log::warn!("Failed to release run lock: {error}");
        }

        match outcome {
            Ok(result) => Ok(result),
            Err(error) => {
                log::error!("Sync run aborted: {error}");
                Ok(SyncResult::failed(mode, error.to_string()))
            }
        }
    }

    /// `Starting`: turn the invocation into a concrete scope.
    async fn resolve_scope(&self, request: &RunRequest) -> Result<RunScope> {
        match request {
            RunRequest::Incremental => {
                let cutoff = Utc::now() - Duration::minutes(self.config.sync.lookback_minutes);
                self.warn_about_leftover(SyncMode::Incremental).await;
                Ok(RunScope {
                    mode: SyncMode::Incremental,
                    cutoff: Some(cutoff),
                    prior: None,
                })
            }
            RunRequest::Full => {
                self.warn_about_leftover(SyncMode::Full).await;
                Ok(RunScope {
                    mode: SyncMode::Full,
                    cutoff: None,
                    prior: None,
                })
            }
            RunRequest::Resume { handle } => {
                let manifest = self
                    .store
                    .load_by_handle(handle)
                    .await?
                    .ok_or_else(|| {
                        AppError::validation(format!("no manifest found at '{handle}'"))
                    })?;
                log::info!(
                    "Resuming {} run from {}: {} of {} batches already sent",
                    manifest.mode,
                    handle,
                    manifest.total_batches - manifest.unsent_indices().len(),
                    manifest.total_batches
                );
                Ok(RunScope {
                    mode: manifest.mode,
                    cutoff: manifest.cutoff,
                    prior: Some(manifest),
                })
            }
        }
    }

    /// A scheduled run starts fresh; a leftover manifest from an earlier
    /// failure stays untouched until this run replaces or clears it, but
    /// the operator should know it was there.
    async fn warn_about_leftover(&self, mode: SyncMode) {
        match self.store.load_manifest(mode).await {
            Ok(Some(manifest)) if !manifest.is_complete() => {
                log::warn!(
                    "A previous {mode} run left {} unsent batches behind; starting fresh",
                    manifest.unsent_indices().len()
                );
            }
            Ok(_) => {}
            Err(error) => log::warn!("Could not check for a leftover manifest: {error}"),
        }
    }

    /// `Fetching` through `Finalizing`.
    async fn execute(&self, scope: RunScope) -> Result<SyncResult> {
        let policy = RetryPolicy::from_config(&self.config.sync.retry);

        // Fetching
        let fetch_scope = match scope.cutoff {
            Some(cutoff) if scope.mode == SyncMode::Incremental => {
                FetchScope::ChangedSince(cutoff)
            }
            _ => FetchScope::Full,
        };
        let source = self.source.as_ref();
        let raw = with_retry(&policy, "fetch catalog", move || {
            source.fetch_catalog(fetch_scope)
        })
        .await?;

        if raw.products.is_empty() {
            log::info!("No products in scope; nothing to sync");
            self.store.clear_manifest(scope.mode).await?;
            return Ok(SyncResult::no_updates(scope.mode));
        }

        // Assembling
        let rules = AssemblyRules::from_config(&self.config);
        let records = assemble(&raw, &rules);
        let mut batches = partition_batches(records, self.config.sync.batch_size);
        log::info!(
            "Assembled {} records into {} batches",
            batches.iter().map(Batch::len).sum::<usize>(),
            batches.len()
        );

        let mut manifest = match scope.prior {
            Some(prior) => self.restore_progress(prior, &mut batches)?,
            None => Manifest::for_run(scope.mode, scope.cutoff, &batches),
        };
        let mut handle = self.store.save_manifest(&manifest).await?;

        // SendingBatches
        let mut products_synced = 0usize;
        let mut rejections = Vec::new();
        let mut cancelled = false;
        let total = batches.len();
        let todo: Vec<usize> = batches
            .iter()
            .filter(|b| b.status != BatchStatus::Sent)
            .map(|b| b.index)
            .collect();

        for index in todo {
            // Cancellation is honored only here, at batch boundaries, so a
            // batch's outcome is never left ambiguous in the manifest.
            if self.cancel.is_cancelled() {
                log::warn!("Stop requested; halting before batch {index}");
                cancelled = true;
                break;
            }

            if self.config.logging.show_progress {
                log::info!(
                    "Sending batch {}/{} ({} records)",
                    index + 1,
                    total,
                    batches[index].len()
                );
            }

            let context = format!("send batch {index}");
            let target = self.target.as_ref();
            let batch = &batches[index];
            let attempt = with_retry(&policy, &context, move || target.send_batch(batch)).await;

            let (status, sent_at) = match attempt {
                Ok(outcome) if outcome.all_rejected() => {
                    log::warn!("Batch {index} failed: every record rejected");
                    rejections.extend(outcome.rejected);
                    (BatchStatus::Failed, None)
                }
                Ok(outcome) => {
                    products_synced += outcome.accepted.len();
                    rejections.extend(outcome.rejected);
                    (BatchStatus::Sent, Some(Utc::now()))
                }
                Err(error) => {
                    log::error!("Batch {index} failed after retries: {error}");
                    (BatchStatus::Failed, None)
                }
            };

            batches[index].status = status;
            manifest.mark(index, status, sent_at);
            handle = self.store.save_manifest(&manifest).await?;
        }

        // Finalizing
        let failed_batches = manifest.failed_indices();
        let complete = !cancelled && manifest.is_complete();
        let status = if complete {
            self.store.clear_manifest(scope.mode).await?;
            SyncStatus::Succeeded
        } else {
            SyncStatus::PartiallyFailed
        };

        Ok(SyncResult {
            status,
            mode: scope.mode,
            products_synced,
            failed_batches,
            rejections,
            resume_handle: (!complete).then_some(handle),
            failure: None,
            completed_at: Utc::now(),
        })
    }

    /// Restore a resumed run's batch statuses from its manifest.
    ///
    /// The rebuilt catalog must fingerprint to the checkpointed value;
    /// otherwise the stored batch indices describe a different record set
    /// and resuming would corrupt the target.
    fn restore_progress(&self, prior: Manifest, batches: &mut [Batch]) -> Result<Manifest> {
        let fingerprint = Manifest::fingerprint_of(batches);
        if fingerprint != prior.fingerprint {
            return Err(AppError::ManifestMismatch(format!(
                "rebuilt catalog does not match the checkpoint ({} batches now, {} recorded); \
                 run a fresh sync instead",
                batches.len(),
                prior.total_batches
            )));
        }
        for descriptor in &prior.batches {
            if let Some(batch) = batches.get_mut(descriptor.index) {
                batch.status = descriptor.status;
            }
        }
        Ok(prior)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::{RawCatalog, RawProduct};
    use crate::services::BatchOutcome;
    use crate::storage::RunLock;

    fn test_config() -> Arc<Config> {
        let mut config = Config::default();
        config.sync.batch_size = 100;
        config.sync.retry.max_attempts = 3;
        config.sync.retry.base_delay_ms = 1;
        config.sync.retry.max_delay_ms = 2;
        config.logging.show_progress = false;
        Arc::new(config)
    }

    fn make_raw_products(count: usize) -> Vec<RawProduct> {
        (0..count)
            .map(|i| RawProduct {
                id: i as u64,
                sku: format!("SKU-{i:04}"),
                name: format!("Product {i}"),
                status: 1,
                updated_at: "2026-08-01 09:00:00".into(),
                media_gallery_entries: vec![],
                custom_attributes: vec![],
            })
            .collect()
    }

    /// Feed returning a fixed product set.
    struct StubFeed {
        products: Vec<RawProduct>,
    }

    #[async_trait]
    impl CatalogFeed for StubFeed {
        async fn fetch_catalog(&self, _scope: FetchScope) -> crate::error::Result<RawCatalog> {
            Ok(RawCatalog {
                products: self.products.clone(),
                ..RawCatalog::default()
            })
        }
    }

    /// Sink that fails configured batch indices with `TargetUnavailable`
    /// and accepts everything else, recording the call order.
    struct ScriptedSink {
        fail_indices: HashSet<usize>,
        calls: Mutex<Vec<usize>>,
    }

    impl ScriptedSink {
        fn new(fail_indices: impl IntoIterator<Item = usize>) -> Self {
            Self {
                fail_indices: fail_indices.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSink for ScriptedSink {
        async fn send_batch(&self, batch: &Batch) -> crate::error::Result<BatchOutcome> {
            self.calls.lock().unwrap().push(batch.index);
            if self.fail_indices.contains(&batch.index) {
                return Err(AppError::target(format!("batch {}: HTTP 503", batch.index)));
            }
            Ok(BatchOutcome {
                accepted: batch.record_ids(),
                rejected: vec![],
            })
        }
    }

    /// In-memory checkpoint store.
    struct MemoryStore {
        manifest: Mutex<Option<Manifest>>,
        lock: Mutex<Option<RunLock>>,
        saves: AtomicUsize,
        clears: AtomicUsize,
        fail_saves_after: Option<usize>,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                manifest: Mutex::new(None),
                lock: Mutex::new(None),
                saves: AtomicUsize::new(0),
                clears: AtomicUsize::new(0),
                fail_saves_after: None,
            }
        }

        fn failing_saves_after(count: usize) -> Self {
            Self {
                fail_saves_after: Some(count),
                ..Self::new()
            }
        }

        fn stored(&self) -> Option<Manifest> {
            self.manifest.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CheckpointStore for MemoryStore {
        async fn load_manifest(&self, mode: SyncMode) -> crate::error::Result<Option<Manifest>> {
            Ok(self
                .manifest
                .lock()
                .unwrap()
                .clone()
                .filter(|m| m.mode == mode))
        }

        async fn load_by_handle(&self, handle: &str) -> crate::error::Result<Option<Manifest>> {
            if handle == "mem://manifest" {
                Ok(self.manifest.lock().unwrap().clone())
            } else {
                Ok(None)
            }
        }

        async fn save_manifest(&self, manifest: &Manifest) -> crate::error::Result<String> {
            let count = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_saves_after.is_some_and(|limit| count > limit) {
                return Err(AppError::checkpoint("store offline"));
            }
            *self.manifest.lock().unwrap() = Some(manifest.clone());
            Ok("mem://manifest".to_string())
        }

        async fn clear_manifest(&self, _mode: SyncMode) -> crate::error::Result<()> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            *self.manifest.lock().unwrap() = None;
            Ok(())
        }

        async fn acquire_lock(&self, holder: &str) -> crate::error::Result<RunLock> {
            let mut lock = self.lock.lock().unwrap();
            if let Some(existing) = lock.as_ref() {
                if !existing.is_expired(Utc::now()) {
                    return Err(AppError::RunAlreadyInProgress {
                        holder: existing.holder.clone(),
                        expires_at: existing.expires_at.to_rfc3339(),
                    });
                }
            }
            let fresh = RunLock::new(holder, 600);
            *lock = Some(fresh.clone());
            Ok(fresh)
        }

        async fn release_lock(&self, _lock: &RunLock) -> crate::error::Result<()> {
            *self.lock.lock().unwrap() = None;
            Ok(())
        }
    }

    fn engine(
        products: usize,
        sink: Arc<ScriptedSink>,
        store: Arc<MemoryStore>,
        cancel: CancellationToken,
    ) -> SyncEngine {
        SyncEngine::new(
            test_config(),
            store,
            Arc::new(StubFeed {
                products: make_raw_products(products),
            }),
            sink,
            cancel,
        )
    }

    #[tokio::test]
    async fn full_success_clears_manifest() {
        let sink = Arc::new(ScriptedSink::new([]));
        let store = Arc::new(MemoryStore::new());
        let engine = engine(250, sink.clone(), store.clone(), CancellationToken::new());

        let result = engine.run(RunRequest::Full).await.unwrap();

        assert_eq!(result.status, SyncStatus::Succeeded);
        assert_eq!(result.products_synced, 250);
        assert!(result.failed_batches.is_empty());
        assert!(result.resume_handle.is_none());
        assert_eq!(sink.calls(), vec![0, 1, 2]);
        assert!(store.stored().is_none());
        assert_eq!(store.clears.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_failure_is_recorded_and_the_rest_still_sent() {
        // 450 products, batch size 100; batch 3 exhausts its 3 attempts.
        let sink = Arc::new(ScriptedSink::new([3]));
        let store = Arc::new(MemoryStore::new());
        let engine = engine(450, sink.clone(), store.clone(), CancellationToken::new());

        let result = engine.run(RunRequest::Incremental).await.unwrap();

        assert_eq!(result.status, SyncStatus::PartiallyFailed);
        assert_eq!(result.products_synced, 350);
        assert_eq!(result.failed_batches, vec![3]);
        assert_eq!(result.resume_handle.as_deref(), Some("mem://manifest"));
        assert_eq!(
            result.resume_command().as_deref(),
            Some("catsync resume mem://manifest")
        );

        // Three attempts on batch 3, then iteration continued to batch 4.
        assert_eq!(sink.calls(), vec![0, 1, 2, 3, 3, 3, 4]);

        let manifest = store.stored().expect("manifest retained for resume");
        assert_eq!(manifest.highest_sent_index, Some(4));
        assert_eq!(manifest.failed_indices(), vec![3]);
        assert_eq!(manifest.total_products, 450);
    }

    #[tokio::test]
    async fn zero_changed_products_is_no_updates() {
        let sink = Arc::new(ScriptedSink::new([]));
        let store = Arc::new(MemoryStore::new());
        let engine = engine(0, sink.clone(), store.clone(), CancellationToken::new());

        let result = engine.run(RunRequest::Incremental).await.unwrap();

        assert_eq!(result.status, SyncStatus::NoUpdates);
        assert_eq!(result.products_synced, 0);
        assert!(result.resume_command().is_none());
        assert!(sink.calls().is_empty());
        // Only the clearing of any prior manifest; no manifest writes.
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        assert_eq!(store.clears.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_invocation_fails_fast_without_manifest_writes() {
        let store = Arc::new(MemoryStore::new());
        store
            .acquire_lock("other-run")
            .await
            .expect("seed the lock");

        let sink = Arc::new(ScriptedSink::new([]));
        let engine = engine(100, sink.clone(), store.clone(), CancellationToken::new());

        let result = engine.run(RunRequest::Incremental).await;
        assert!(matches!(
            result,
            Err(AppError::RunAlreadyInProgress { .. })
        ));
        assert!(sink.calls().is_empty());
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resume_sends_only_unsent_batches() {
        let store = Arc::new(MemoryStore::new());

        // First run: batch 3 of 5 fails.
        let first_sink = Arc::new(ScriptedSink::new([3]));
        let first = engine(450, first_sink, store.clone(), CancellationToken::new());
        let first_result = first.run(RunRequest::Incremental).await.unwrap();
        assert_eq!(first_result.status, SyncStatus::PartiallyFailed);

        // Resume: only the failed batch goes out again.
        let resume_sink = Arc::new(ScriptedSink::new([]));
        let resume = engine(450, resume_sink.clone(), store.clone(), CancellationToken::new());
        let result = resume
            .run(RunRequest::Resume {
                handle: "mem://manifest".into(),
            })
            .await
            .unwrap();

        assert_eq!(resume_sink.calls(), vec![3]);
        assert_eq!(result.status, SyncStatus::Succeeded);
        assert_eq!(result.products_synced, 100);
        assert!(store.stored().is_none());
    }

    #[tokio::test]
    async fn resume_with_unknown_handle_is_an_invocation_error() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(ScriptedSink::new([]));
        let engine = engine(100, sink, store.clone(), CancellationToken::new());

        let result = engine
            .run(RunRequest::Resume {
                handle: "mem://missing".into(),
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        // The lock must have been released again.
        assert!(store.lock.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_refuses_a_changed_catalog() {
        let store = Arc::new(MemoryStore::new());

        let first_sink = Arc::new(ScriptedSink::new([1]));
        let first = engine(200, first_sink, store.clone(), CancellationToken::new());
        first.run(RunRequest::Incremental).await.unwrap();

        // Different upstream content: the fingerprint no longer matches.
        let resume_sink = Arc::new(ScriptedSink::new([]));
        let resume = engine(210, resume_sink.clone(), store.clone(), CancellationToken::new());
        let result = resume
            .run(RunRequest::Resume {
                handle: "mem://manifest".into(),
            })
            .await
            .unwrap();

        assert_eq!(result.status, SyncStatus::Failed);
        assert!(result.failure.as_deref().unwrap().contains("Manifest mismatch"));
        assert!(resume_sink.calls().is_empty());
    }

    #[tokio::test]
    async fn cancellation_is_honored_at_batch_boundaries() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let sink = Arc::new(ScriptedSink::new([]));
        let store = Arc::new(MemoryStore::new());
        let engine = engine(300, sink.clone(), store.clone(), cancel);

        let result = engine.run(RunRequest::Full).await.unwrap();

        // No batch was started, and the run is resumable.
        assert!(sink.calls().is_empty());
        assert_eq!(result.status, SyncStatus::PartiallyFailed);
        assert_eq!(result.resume_handle.as_deref(), Some("mem://manifest"));
        assert!(store.stored().is_some());
    }

    #[tokio::test]
    async fn checkpoint_failure_aborts_the_run() {
        // First save (initial manifest) succeeds; the save after batch 0
        // fails, which must abort instead of continuing blind.
        let sink = Arc::new(ScriptedSink::new([]));
        let store = Arc::new(MemoryStore::failing_saves_after(1));
        let engine = engine(300, sink.clone(), store.clone(), CancellationToken::new());

        let result = engine.run(RunRequest::Full).await.unwrap();

        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(sink.calls(), vec![0]);
        assert!(result
            .failure
            .as_deref()
            .unwrap()
            .contains("Checkpoint store unavailable"));
    }

    #[tokio::test]
    async fn upstream_failure_exhausts_retries_then_fails() {
        struct FailingFeed {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl CatalogFeed for FailingFeed {
            async fn fetch_catalog(
                &self,
                _scope: FetchScope,
            ) -> crate::error::Result<RawCatalog> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::upstream("products", "connection refused"))
            }
        }

        let feed = Arc::new(FailingFeed {
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(
            test_config(),
            store.clone(),
            feed.clone(),
            Arc::new(ScriptedSink::new([])),
            CancellationToken::new(),
        );

        let result = engine.run(RunRequest::Incremental).await.unwrap();

        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.resume_command().as_deref(), Some("catsync sync"));
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    }
}
