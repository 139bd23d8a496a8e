//! Entry points for starting and cancelling renders.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lapse_common::{
    iso_timestamp, CancellationCoordinator, OperationHandle, OperationId, OperationKind,
};
use lapse_photo_model::{Photo, RenderSettings};

use crate::engine::{RenderOutcome, TimelapseRenderEngine};

pub type RenderHandle = OperationHandle<RenderOutcome>;

/// `timelapse-<ISO 8601 UTC>.<ext>`.
pub fn output_file_name(at: DateTime<Utc>, ext: &str) -> String {
    format!("timelapse-{}.{ext}", iso_timestamp(at))
}

/// Runs renders as registered, cancellable operations.
pub struct RenderService {
    engine: Arc<TimelapseRenderEngine>,
    coordinator: Arc<CancellationCoordinator>,
    output_dir: PathBuf,
}

impl RenderService {
    pub fn new(
        engine: Arc<TimelapseRenderEngine>,
        coordinator: Arc<CancellationCoordinator>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            coordinator,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Render into a new timestamped file in the output directory.
    pub fn start_render(&self, photos: Vec<Photo>, settings: RenderSettings) -> RenderHandle {
        let name = output_file_name(Utc::now(), &self.engine.config().container_ext);
        self.start_render_to(photos, settings, self.output_dir.join(name))
    }

    /// Render into `output`. Must be called within a tokio runtime.
    pub fn start_render_to(
        &self,
        photos: Vec<Photo>,
        settings: RenderSettings,
        output: PathBuf,
    ) -> RenderHandle {
        let (id, token) = self.coordinator.register(OperationKind::Render);
        let engine = Arc::clone(&self.engine);
        let coordinator = Arc::clone(&self.coordinator);

        tracing::info!(%id, output = %output.display(), photos = photos.len(), "Render started");
        let join = tokio::spawn(async move {
            let outcome = engine.render(&photos, &settings, &output, &token).await;
            coordinator.finish(id);
            outcome
        });
        OperationHandle::new(id, join)
    }

    /// Cancel the render started as `id` (see [`OperationHandle::id`]).
    ///
    /// Returns `false` if it already finished or was already cancelled.
    pub fn cancel_render(&self, id: OperationId) -> bool {
        self.coordinator.cancel_as(id, OperationKind::Render)
    }
}
