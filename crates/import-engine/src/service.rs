//! Entry points for starting and cancelling imports.

use std::sync::Arc;

use lapse_common::{
    CancellationCoordinator, ImportConfig, LapseResult, MemoryLevel, NullProgress,
    OperationHandle, OperationId, OperationKind, ProgressSink,
};
use lapse_photo_model::{Photo, PhotoStore, SourceAssetRef};
use tokio::sync::watch;

use crate::scheduler::{AdaptiveImportScheduler, ImportReport};
use crate::source::AssetSource;
use crate::upgrade::{QualityUpgrader, UpgradeReport};

pub type ImportHandle = OperationHandle<LapseResult<ImportReport>>;
pub type UpgradeHandle = OperationHandle<LapseResult<UpgradeReport>>;

/// Runs imports and quality upgrades as registered, cancellable operations.
///
/// Starting an import cancels any import or upgrade still running.
pub struct ImportService {
    source: Arc<dyn AssetSource>,
    store: Arc<dyn PhotoStore>,
    memory: watch::Receiver<MemoryLevel>,
    coordinator: Arc<CancellationCoordinator>,
    config: ImportConfig,
    progress: Arc<dyn ProgressSink>,
}

impl ImportService {
    pub fn new(
        source: Arc<dyn AssetSource>,
        store: Arc<dyn PhotoStore>,
        memory: watch::Receiver<MemoryLevel>,
        coordinator: Arc<CancellationCoordinator>,
        config: ImportConfig,
    ) -> Self {
        Self {
            source,
            store,
            memory,
            coordinator,
            config,
            progress: Arc::new(NullProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Start importing `assets`. Must be called within a tokio runtime.
    pub fn start_import(&self, assets: Vec<SourceAssetRef>) -> ImportHandle {
        let previous = self.coordinator.cancel_kind(OperationKind::Import)
            + self.coordinator.cancel_kind(OperationKind::Upgrade);
        if previous > 0 {
            tracing::info!(previous, "Cancelled running import work");
        }

        let (id, token) = self.coordinator.register(OperationKind::Import);
        let scheduler = AdaptiveImportScheduler::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            self.memory.clone(),
            Arc::clone(&self.coordinator),
            self.config.clone(),
        )
        .with_progress(Arc::clone(&self.progress));
        let coordinator = Arc::clone(&self.coordinator);

        let join = tokio::spawn(async move {
            let result = scheduler.run(assets, token).await;
            coordinator.finish(id);
            result
        });
        tracing::info!(%id, "Import started");
        OperationHandle::new(id, join)
    }

    /// Cancel the import started as `id`. Returns `false` if it is no longer running.
    pub fn cancel_import(&self, id: OperationId) -> bool {
        self.coordinator.cancel_as(id, OperationKind::Import)
    }

    /// Start upgrading `photos` to full quality, replacing any running upgrade.
    pub fn start_upgrade(&self, photos: Vec<Photo>) -> UpgradeHandle {
        self.coordinator.cancel_kind(OperationKind::Upgrade);

        let (id, token) = self.coordinator.register(OperationKind::Upgrade);
        let upgrader = QualityUpgrader::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            self.memory.clone(),
            self.config.clone(),
        )
        .with_progress(Arc::clone(&self.progress));
        let coordinator = Arc::clone(&self.coordinator);

        let join = tokio::spawn(async move {
            let result = upgrader.run(photos, token).await;
            coordinator.finish(id);
            result
        });
        tracing::info!(%id, "Quality upgrade started");
        OperationHandle::new(id, join)
    }

    pub fn cancel_upgrade(&self, id: OperationId) -> bool {
        self.coordinator.cancel_as(id, OperationKind::Upgrade)
    }
}
