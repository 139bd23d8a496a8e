//! Quality upgrade pass.
//!
//! A first import stores small, fast decodes. The upgrade pass re-fetches
//! each photo from its source at full quality and replaces the stored image,
//! one photo at a time. It stops on its own when memory turns critical.

use std::sync::Arc;

use lapse_common::{
    CancellationToken, ImportConfig, ImportError, LapseResult, MemoryLevel, NullProgress,
    ProgressSink,
};
use lapse_photo_model::{FetchQuality, MediaKind, Photo, PhotoStore, SourceAssetRef};
use serde::Serialize;
use tokio::sync::watch;

use crate::policy::{pacing_delay, PacingKind};
use crate::scheduler::{fetch_one, ImportOutcome};
use crate::source::AssetSource;

pub const STATUS_UPGRADE_CANCELLED: &str = "Quality upgrade cancelled";

/// Result of an upgrade pass.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeReport {
    pub outcome: ImportOutcome,
    pub total: usize,
    pub upgraded: usize,
    /// Photos without a source, or already at full size.
    pub skipped: usize,
    /// Photos whose re-fetch failed; they keep their fast-quality image.
    pub failed: usize,
}

/// Re-fetches stored photos at high quality.
pub struct QualityUpgrader {
    source: Arc<dyn AssetSource>,
    store: Arc<dyn PhotoStore>,
    memory: watch::Receiver<MemoryLevel>,
    config: ImportConfig,
    progress: Arc<dyn ProgressSink>,
}

impl QualityUpgrader {
    pub fn new(
        source: Arc<dyn AssetSource>,
        store: Arc<dyn PhotoStore>,
        memory: watch::Receiver<MemoryLevel>,
        config: ImportConfig,
    ) -> Self {
        Self {
            source,
            store,
            memory,
            config,
            progress: Arc::new(NullProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&self, photos: Vec<Photo>, token: CancellationToken) -> LapseResult<UpgradeReport> {
        let total = photos.len();
        let mut report = UpgradeReport {
            outcome: ImportOutcome::Completed,
            total,
            upgraded: 0,
            skipped: 0,
            failed: 0,
        };
        tracing::info!(total, "Starting quality upgrade");

        for (i, photo) in photos.into_iter().enumerate() {
            let level = *self.memory.borrow();
            if level == MemoryLevel::Critical {
                tracing::warn!("Critical memory: stopping quality upgrade");
                token.cancel();
            }
            if token.is_cancelled() {
                return Ok(self.cancelled(report, i));
            }

            match self.upgrade_one(&photo, &token).await? {
                Step::Upgraded => report.upgraded += 1,
                Step::Skipped => report.skipped += 1,
                Step::Failed => report.failed += 1,
                Step::Cancelled => return Ok(self.cancelled(report, i)),
            }

            self.progress.update(
                &format!("Upgrading photo quality... {}/{}", i + 1, total),
                (i + 1) as f64 / total as f64,
            );

            let delay = pacing_delay(&self.config.delays, *self.memory.borrow(), PacingKind::Upgrade);
            if i + 1 < total && !token.sleep(delay).await {
                return Ok(self.cancelled(report, i + 1));
            }
        }

        tracing::info!(
            upgraded = report.upgraded,
            skipped = report.skipped,
            failed = report.failed,
            "Quality upgrade complete"
        );
        Ok(report)
    }

    async fn upgrade_one(&self, photo: &Photo, token: &CancellationToken) -> LapseResult<Step> {
        let Some(source_id) = photo.source.clone() else {
            return Ok(Step::Skipped);
        };
        // Stored dimensions stand in for the original's aspect ratio.
        let asset = SourceAssetRef {
            id: source_id,
            pixel_width: photo.width,
            pixel_height: photo.height,
            created_at: photo.captured_at,
            kind: MediaKind::Image,
        };
        let target = asset.target_size_for_width(self.config.upgrade_target_width);
        if photo.width >= target.width {
            return Ok(Step::Skipped);
        }

        let fetched = fetch_one(
            self.source.as_ref(),
            &asset,
            target,
            FetchQuality::High,
            self.config.fetch_timeout(),
            token,
        )
        .await;

        match fetched {
            Ok(image) => {
                let updated = self.store.replace(photo.id, &image)?;
                tracing::debug!(
                    photo = %updated.id,
                    width = updated.width,
                    height = updated.height,
                    "Upgraded photo"
                );
                Ok(Step::Upgraded)
            }
            Err(ImportError::Cancelled) => Ok(Step::Cancelled),
            Err(error) => {
                tracing::warn!(photo = %photo.id, error = %error, "Quality upgrade failed, keeping fast image");
                Ok(Step::Failed)
            }
        }
    }

    fn cancelled(&self, mut report: UpgradeReport, done: usize) -> UpgradeReport {
        let fraction = if report.total == 0 {
            0.0
        } else {
            done as f64 / report.total as f64
        };
        self.progress.update(STATUS_UPGRADE_CANCELLED, fraction);
        report.outcome = ImportOutcome::Cancelled;
        tracing::info!(upgraded = report.upgraded, total = report.total, "Quality upgrade cancelled");
        report
    }
}

enum Step {
    Upgraded,
    Skipped,
    Failed,
    Cancelled,
}
