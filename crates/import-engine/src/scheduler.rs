//! Adaptive bulk import.
//!
//! The scheduler walks the input in batches whose size and fetch concurrency
//! follow the latest memory level. Plans are recomputed only at batch
//! boundaries, so a level change never resizes a batch already in flight.
//! Failed fetches go to a retry queue that is drained once after the main
//! pass.

use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use lapse_common::{
    CancellationCoordinator, CancellationToken, ImportConfig, ImportError, LapseResult,
    MemoryLevel, NullProgress, OperationKind, ProgressSink,
};
use lapse_photo_model::{
    AssetId, FetchQuality, Photo, PhotoStore, SourceAssetRef, TargetSize,
};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::policy::{pacing_delay, BatchPlan, BatchPolicy, PacingKind};
use crate::retry::{RetryEntry, RetryQueue};
use crate::source::AssetSource;

pub const STATUS_CANCELLED: &str = "Import cancelled";

/// How an import ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOutcome {
    Completed,
    Cancelled,
}

/// Plan used for one batch, recorded for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchRecord {
    /// Index of the first asset in the batch.
    pub start: usize,
    pub level: MemoryLevel,
    pub plan: BatchPlan,
}

/// An asset that needed at least one retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryRecord {
    pub asset: AssetId,
    /// Failed attempts before the asset was recovered or dropped.
    pub failed_attempts: u32,
    pub recovered: bool,
}

/// Result of an import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub outcome: ImportOutcome,
    pub total: usize,
    /// Imported photos, in input order.
    pub photos: Vec<Photo>,
    /// Non-image assets passed over without fetching.
    pub skipped: usize,
    pub retries: Vec<RetryRecord>,
    /// Assets dropped after exhausting their attempts.
    pub exhausted: Vec<AssetId>,
    /// Aggregate message for exhausted assets.
    pub warning: Option<String>,
    pub batches: Vec<BatchRecord>,
}

impl ImportReport {
    fn new(total: usize) -> Self {
        Self {
            outcome: ImportOutcome::Completed,
            total,
            photos: Vec::new(),
            skipped: 0,
            retries: Vec::new(),
            exhausted: Vec::new(),
            warning: None,
            batches: Vec::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == ImportOutcome::Cancelled
    }
}

/// Imports assets into a photo store under memory-adaptive batching.
pub struct AdaptiveImportScheduler {
    source: Arc<dyn AssetSource>,
    store: Arc<dyn PhotoStore>,
    memory: watch::Receiver<MemoryLevel>,
    coordinator: Arc<CancellationCoordinator>,
    config: ImportConfig,
    policy: BatchPolicy,
    progress: Arc<dyn ProgressSink>,
}

/// Mutable bookkeeping for one run.
struct RunState {
    report: ImportReport,
    /// Imported photos tagged with their input index.
    imported: Vec<(usize, Photo)>,
    retry: RetryQueue,
    settled: usize,
    streak: u32,
}

impl AdaptiveImportScheduler {
    pub fn new(
        source: Arc<dyn AssetSource>,
        store: Arc<dyn PhotoStore>,
        memory: watch::Receiver<MemoryLevel>,
        coordinator: Arc<CancellationCoordinator>,
        config: ImportConfig,
    ) -> Self {
        let policy = BatchPolicy::from_config(&config);
        Self {
            source,
            store,
            memory,
            coordinator,
            config,
            policy,
            progress: Arc::new(NullProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    fn level(&self) -> MemoryLevel {
        *self.memory.borrow()
    }

    /// Import `assets` in order.
    ///
    /// Per-asset failures never fail the run. Only a photo store error does.
    pub async fn run(
        &self,
        assets: Vec<SourceAssetRef>,
        token: CancellationToken,
    ) -> LapseResult<ImportReport> {
        let total = assets.len();
        let mut state = RunState {
            report: ImportReport::new(total),
            imported: Vec::new(),
            retry: RetryQueue::new(self.config.retry_attempts),
            settled: 0,
            streak: 0,
        };
        tracing::info!(total, "Starting import");
        self.report_progress(&state);

        let mut cursor = 0;
        while cursor < total {
            if token.is_cancelled() {
                return Ok(self.cancelled(state));
            }

            let level = self.level();
            let plan = self.policy.plan(level);
            if level == MemoryLevel::Critical {
                let cancelled = self.coordinator.cancel_kind(OperationKind::Upgrade);
                if cancelled > 0 {
                    tracing::warn!(cancelled, "Critical memory: cancelled quality upgrade");
                }
            }

            let end = (cursor + plan.batch_size).min(total);
            state.report.batches.push(BatchRecord {
                start: cursor,
                level,
                plan,
            });
            tracing::info!(
                batch = state.report.batches.len(),
                start = cursor,
                size = end - cursor,
                concurrency = plan.concurrency,
                level = %level,
                "Importing batch"
            );

            let batch: Vec<(usize, SourceAssetRef)> = assets[cursor..end]
                .iter()
                .cloned()
                .enumerate()
                .map(|(offset, asset)| (cursor + offset, asset))
                .collect();
            cursor = end;

            let results = self.fetch_batch(batch, plan.concurrency, &token).await;
            for (index, asset, result) in results {
                self.commit(&mut state, index, asset, result)?;
                if index + 1 < total && !self.pace(&mut state, &token).await {
                    return Ok(self.cancelled(state));
                }
            }

            if token.is_cancelled() {
                return Ok(self.cancelled(state));
            }
            if cursor < total && !token.sleep(self.config.batch_pause()).await {
                return Ok(self.cancelled(state));
            }
        }

        if !self.drain_retries(&mut state, &token).await? {
            return Ok(self.cancelled(state));
        }

        Ok(self.finish(state))
    }

    /// Sleep the memory-proportional pacing delay once the success streak
    /// reaches `delay_every_successes`. Returns `false` if cancelled.
    async fn pace(&self, state: &mut RunState, token: &CancellationToken) -> bool {
        let every = self.config.delay_every_successes;
        if every == 0 || state.streak < every {
            return true;
        }
        state.streak = 0;
        let delay = pacing_delay(&self.config.delays, self.level(), PacingKind::Import);
        tracing::trace!(delay_ms = delay.as_millis() as u64, "Pacing import");
        token.sleep(delay).await
    }

    /// Fetch one batch with bounded concurrency. Results come back in input order.
    async fn fetch_batch(
        &self,
        batch: Vec<(usize, SourceAssetRef)>,
        concurrency: usize,
        token: &CancellationToken,
    ) -> Vec<(usize, SourceAssetRef, FetchResult)> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (slot, (_, asset)) in batch.iter().enumerate() {
            if !asset.is_image() {
                continue;
            }
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            let token = token.clone();
            let asset = asset.clone();
            let target = asset.target_size_for_width(self.config.fast_target_width);
            let timeout = self.config.fetch_timeout();

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        fetch_one(
                            source.as_ref(),
                            &asset,
                            target,
                            FetchQuality::Fast,
                            timeout,
                            &token,
                        )
                        .await
                    }
                    Err(_) => Err(ImportError::Cancelled),
                };
                (slot, result)
            });
        }

        let mut slots: Vec<Option<FetchResult>> = (0..batch.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => slots[slot] = Some(result.map(FetchOutcome::Image)),
                Err(e) => tracing::error!(error = %e, "Fetch task failed"),
            }
        }

        batch
            .into_iter()
            .zip(slots)
            .map(|((index, asset), result)| {
                let result = if asset.is_image() {
                    result.unwrap_or_else(|| {
                        Err(ImportError::load_failed("fetch task did not complete"))
                    })
                } else {
                    Ok(FetchOutcome::Skipped)
                };
                (index, asset, result)
            })
            .collect()
    }

    fn commit(
        &self,
        state: &mut RunState,
        index: usize,
        asset: SourceAssetRef,
        result: FetchResult,
    ) -> LapseResult<()> {
        match result {
            Ok(FetchOutcome::Image(image)) => {
                let photo = self.store.append(&image, asset.created_at, Some(&asset.id))?;
                tracing::debug!(index, asset = %asset.id, photo = %photo.id, "Imported photo");
                state.imported.push((index, photo));
                state.streak += 1;
                state.settled += 1;
            }
            Ok(FetchOutcome::Skipped) => {
                tracing::debug!(index, asset = %asset.id, kind = ?asset.kind, "Skipping non-image asset");
                state.report.skipped += 1;
                state.settled += 1;
            }
            Err(ImportError::Cancelled) => return Ok(()),
            Err(error) => {
                tracing::warn!(index, asset = %asset.id, error = %error, "Fetch failed, queued for retry");
                state.streak = 0;
                state.retry.push(asset, index, error);
                return Ok(());
            }
        }
        self.report_progress(state);
        Ok(())
    }

    /// Retry every queued asset until it succeeds or runs out of attempts.
    ///
    /// Returns `false` if cancelled.
    async fn drain_retries(
        &self,
        state: &mut RunState,
        token: &CancellationToken,
    ) -> LapseResult<bool> {
        if state.retry.is_empty() {
            return Ok(true);
        }
        tracing::info!(queued = state.retry.len(), "Retrying failed imports");

        while let Some(mut entry) = state.retry.pop() {
            loop {
                if state.retry.is_exhausted(&entry) {
                    tracing::warn!(
                        asset = %entry.asset.id,
                        attempts = entry.attempts,
                        error = %entry.last_error,
                        "Giving up on asset"
                    );
                    state.report.retries.push(retry_record(&entry, false));
                    state.report.exhausted.push(entry.asset.id.clone());
                    break;
                }
                if !token.sleep(self.config.retry_delay()).await {
                    return Ok(false);
                }
                let target = entry
                    .asset
                    .target_size_for_width(self.config.fast_target_width);
                let result = fetch_one(
                    self.source.as_ref(),
                    &entry.asset,
                    target,
                    FetchQuality::High,
                    self.config.fetch_timeout(),
                    token,
                )
                .await;

                match result {
                    Ok(image) => {
                        let photo =
                            self.store
                                .append(&image, entry.asset.created_at, Some(&entry.asset.id))?;
                        tracing::info!(
                            asset = %entry.asset.id,
                            failed_attempts = entry.attempts,
                            "Recovered on retry"
                        );
                        state.report.retries.push(retry_record(&entry, true));
                        state.imported.push((entry.index, photo));
                        break;
                    }
                    Err(ImportError::Cancelled) => return Ok(false),
                    Err(error) => {
                        tracing::debug!(asset = %entry.asset.id, error = %error, "Retry failed");
                        entry.record_failure(error);
                    }
                }
            }
            state.settled += 1;
            self.report_progress(state);
        }
        Ok(true)
    }

    fn report_progress(&self, state: &RunState) {
        let total = state.report.total;
        let fraction = if total == 0 {
            1.0
        } else {
            state.settled as f64 / total as f64
        };
        self.progress.update(
            &format!("Importing photos... {}/{}", state.settled, total),
            fraction,
        );
    }

    fn cancelled(&self, state: RunState) -> ImportReport {
        let fraction = if state.report.total == 0 {
            0.0
        } else {
            state.settled as f64 / state.report.total as f64
        };
        self.progress.update(STATUS_CANCELLED, fraction);
        let mut report = self.collect(state);
        report.outcome = ImportOutcome::Cancelled;
        tracing::info!(imported = report.photos.len(), total = report.total, "Import cancelled");
        report
    }

    fn finish(&self, state: RunState) -> ImportReport {
        let max_attempts = state.retry.max_attempts();
        let mut report = self.collect(state);
        if !report.exhausted.is_empty() {
            let message = format!(
                "Failed to import {} photo(s) after {} attempts",
                report.exhausted.len(),
                max_attempts
            );
            tracing::warn!(exhausted = report.exhausted.len(), "{message}");
            report.warning = Some(message);
        }
        tracing::info!(
            imported = report.photos.len(),
            skipped = report.skipped,
            retried = report.retries.len(),
            total = report.total,
            "Import complete"
        );
        report
    }

    fn collect(&self, state: RunState) -> ImportReport {
        let RunState {
            mut report,
            mut imported,
            ..
        } = state;
        imported.sort_by_key(|(index, _)| *index);
        report.photos = imported.into_iter().map(|(_, photo)| photo).collect();
        report
    }
}

enum FetchOutcome {
    Image(DynamicImage),
    Skipped,
}

type FetchResult = Result<FetchOutcome, ImportError>;

/// Fetch one asset, bounded by `timeout` and interrupted by cancellation.
pub(crate) async fn fetch_one(
    source: &dyn AssetSource,
    asset: &SourceAssetRef,
    target: TargetSize,
    quality: FetchQuality,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<DynamicImage, ImportError> {
    if token.is_cancelled() {
        return Err(ImportError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ImportError::Cancelled),
        fetched = tokio::time::timeout(timeout, source.fetch(asset, target, quality)) => {
            fetched.unwrap_or(Err(ImportError::Timeout))
        }
    }
}

fn retry_record(entry: &RetryEntry, recovered: bool) -> RetryRecord {
    RetryRecord {
        asset: entry.asset.id.clone(),
        failed_attempts: entry.attempts,
        recovered,
    }
}
