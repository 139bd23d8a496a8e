//! The timelapse render engine.
//!
//! A render walks `Idle -> Preparing -> Encoding -> Finalizing` and ends in
//! exactly one of `Completed`, `Cancelled` or `Failed`. Frames are produced
//! one at a time into pooled buffers and handed to a [`FrameWriter`], which
//! waits on encoder readiness and stamps presentation times.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::DynamicImage;
use lapse_common::{
    CancellationToken, MemoryLevel, NullProgress, ProgressSink, RenderConfig, RenderError,
    RenderResult,
};
use lapse_photo_model::{Photo, PhotoId, PhotoStore, RenderMode, RenderSettings};
use serde::Serialize;
use tokio::sync::watch;

use crate::blend::{blend_into, morph_alpha};
use crate::encoder::{EncoderConfig, EncoderFactory, FrameWriter};
use crate::ffmpeg::ensure_parent_dir;
use crate::frame::{working_resolution, FrameBuffer};
use crate::pool::{BufferPool, PoolStats};

pub const STATUS_PREPARING: &str = "Preparing export...";
pub const STATUS_SEQUENTIAL: &str = "Creating traditional timelapse...";
pub const STATUS_MORPH: &str = "Creating morph timelapse...";
pub const STATUS_FINALIZING: &str = "Finalizing...";
pub const STATUS_COMPLETE: &str = "Complete!";
pub const STATUS_CANCELLED: &str = "Timelapse generation cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderState {
    Idle,
    Preparing,
    Encoding,
    Finalizing,
    Completed,
    Cancelled,
    Failed,
}

impl RenderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Observable state of one render call.
///
/// Progress never decreases, and is 1.0 only once the render completed.
pub struct RenderSession {
    state: RenderState,
    progress: f64,
    status: String,
    sink: Arc<dyn ProgressSink>,
}

impl RenderSession {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            state: RenderState::Idle,
            progress: 0.0,
            status: String::new(),
            sink,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    fn enter(&mut self, state: RenderState, status: &str) {
        if self.state.is_terminal() {
            return;
        }
        tracing::debug!(from = ?self.state, to = ?state, "Render state change");
        self.state = state;
        self.status = status.to_string();
        self.sink.update(&self.status, self.progress);
    }

    fn advance(&mut self, fraction: f64) {
        if self.state.is_terminal() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction > self.progress {
            self.progress = fraction;
        }
        self.sink.update(&self.status, self.progress);
    }

    fn complete(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.progress = 1.0;
        self.enter(RenderState::Completed, STATUS_COMPLETE);
    }

    fn cancel(&mut self) {
        self.enter(RenderState::Cancelled, STATUS_CANCELLED);
    }

    fn fail(&mut self, error: &RenderError) {
        self.enter(RenderState::Failed, &error.to_string());
    }
}

/// A finished timelapse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOutput {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frames_written: u64,
    /// Frames dropped because their photo could not be loaded or blended.
    pub frames_skipped: u64,
    pub duration_secs: f64,
    /// Frame buffer pool usage over the render.
    pub buffers: PoolStats,
}

/// Terminal result of a render.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Completed(RenderOutput),
    /// Stopped on request. The partial file has been removed.
    Cancelled { progress: f64 },
    Failed(RenderError),
}

impl RenderOutcome {
    pub fn output(&self) -> Option<&RenderOutput> {
        match self {
            Self::Completed(output) => Some(output),
            _ => None,
        }
    }

    pub fn into_result(self) -> RenderResult<RenderOutput> {
        match self {
            Self::Completed(output) => Ok(output),
            Self::Cancelled { .. } => Err(RenderError::Cancelled),
            Self::Failed(error) => Err(error),
        }
    }
}

/// Renders photo sequences into video files.
pub struct TimelapseRenderEngine {
    store: Arc<dyn PhotoStore>,
    encoder: Arc<dyn EncoderFactory>,
    config: RenderConfig,
    memory: Option<watch::Receiver<MemoryLevel>>,
    progress: Arc<dyn ProgressSink>,
    active_outputs: Mutex<HashSet<PathBuf>>,
}

impl TimelapseRenderEngine {
    pub fn new(
        store: Arc<dyn PhotoStore>,
        encoder: Arc<dyn EncoderFactory>,
        config: RenderConfig,
    ) -> Self {
        Self {
            store,
            encoder,
            config,
            memory: None,
            progress: Arc::new(NullProgress),
            active_outputs: Mutex::new(HashSet::new()),
        }
    }

    /// Trim pooled buffers whenever this receiver reports critical memory.
    pub fn with_memory(mut self, memory: watch::Receiver<MemoryLevel>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render `photos`, in the given order, into `output`.
    pub async fn render(
        &self,
        photos: &[Photo],
        settings: &RenderSettings,
        output: &Path,
        token: &CancellationToken,
    ) -> RenderOutcome {
        let mut session = RenderSession::new(self.progress.clone());
        match self.run(&mut session, photos, settings, output, token).await {
            Ok(out) => {
                session.complete();
                tracing::info!(
                    path = %out.path.display(),
                    frames = out.frames_written,
                    skipped = out.frames_skipped,
                    duration_secs = out.duration_secs,
                    "Timelapse complete"
                );
                RenderOutcome::Completed(out)
            }
            Err(RenderError::Cancelled) => {
                session.cancel();
                tracing::info!(progress = session.progress(), "Timelapse cancelled");
                RenderOutcome::Cancelled {
                    progress: session.progress(),
                }
            }
            Err(error) => {
                session.fail(&error);
                tracing::error!(error = %error, "Timelapse failed");
                RenderOutcome::Failed(error)
            }
        }
    }

    async fn run(
        &self,
        session: &mut RenderSession,
        photos: &[Photo],
        settings: &RenderSettings,
        output: &Path,
        token: &CancellationToken,
    ) -> RenderResult<RenderOutput> {
        settings.validate()?;
        let Some(first) = photos.first() else {
            return Err(RenderError::NoPhotos);
        };
        let _lease = OutputLease::acquire(&self.active_outputs, output)?;

        session.enter(RenderState::Preparing, STATUS_PREPARING);
        let first_image = self
            .decode(first)
            .await
            .map_err(|e| RenderError::setup(format!("first photo is unreadable: {e}")))?;
        let (source_w, source_h) = (first_image.width(), first_image.height());
        let (width, height) = working_resolution(
            source_w,
            source_h,
            self.config.max_dimension,
            settings.quality.resolution(),
        );

        prepare_output(output)?;
        let encoder_config = EncoderConfig::new(width, height, settings.fps, &self.config, output);
        encoder_config.validate()?;
        let encoder = self.encoder.open(&encoder_config).map_err(|e| match e {
            RenderError::SetupFailed { .. } => e,
            other => RenderError::setup(other.to_string()),
        })?;
        tracing::info!(
            photos = photos.len(),
            width,
            height,
            fps = settings.fps,
            mode = %settings.mode,
            output = %output.display(),
            "Starting timelapse render"
        );

        let mut writer = FrameWriter::new(
            encoder,
            settings.fps,
            self.config.ready_poll(),
            self.config.ready_timeout(),
        );
        let mut frames = FrameSource {
            pool: BufferPool::new(width, height, self.config.pool_capacity),
            first: Some((first.id, first_image)),
        };

        let encoded = match settings.mode {
            RenderMode::Morph if photos.len() > 1 => {
                session.enter(RenderState::Encoding, STATUS_MORPH);
                let steps = settings.morph_steps(self.config.max_morph_steps);
                self.encode_morph(photos, steps, &mut writer, &mut frames, session, token)
                    .await
            }
            RenderMode::Morph => {
                session.enter(RenderState::Encoding, STATUS_MORPH);
                self.encode_sequential(photos, &mut writer, &mut frames, session, token)
                    .await
            }
            RenderMode::Sequential => {
                session.enter(RenderState::Encoding, STATUS_SEQUENTIAL);
                self.encode_sequential(photos, &mut writer, &mut frames, session, token)
                    .await
            }
        };

        let frames_skipped = match encoded {
            Ok(skipped) => skipped,
            Err(error) => {
                writer.abort();
                discard_partial(output);
                return Err(error);
            }
        };
        if writer.frames_written() == 0 {
            writer.abort();
            discard_partial(output);
            return Err(RenderError::export("no frames could be rendered"));
        }

        session.enter(RenderState::Finalizing, STATUS_FINALIZING);
        let duration_secs = writer.duration_secs();
        let frames_written = match writer.finish() {
            Ok(frames) => frames,
            Err(error) => {
                discard_partial(output);
                return Err(error);
            }
        };
        set_output_permissions(output);

        let stats = frames.pool.stats();
        tracing::debug!(
            allocations = stats.allocations,
            reuses = stats.reuses,
            trims = stats.trims,
            "Frame pool usage"
        );

        Ok(RenderOutput {
            path: output.to_path_buf(),
            width,
            height,
            frames_written,
            frames_skipped,
            duration_secs,
            buffers: stats,
        })
    }

    /// One frame per photo. Returns the number of skipped frames.
    async fn encode_sequential(
        &self,
        photos: &[Photo],
        writer: &mut FrameWriter,
        frames: &mut FrameSource,
        session: &mut RenderSession,
        token: &CancellationToken,
    ) -> RenderResult<u64> {
        let total = photos.len();
        let mut skipped = 0;

        for (index, photo) in photos.iter().enumerate() {
            if token.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            self.relieve_pressure(&mut frames.pool);

            let written = match self.load_frame(photo, frames).await {
                Ok(frame) => {
                    let result = writer.write(&frame, token).await.map(|_| ());
                    frames.pool.give_back(frame);
                    result
                }
                Err(error) => Err(error),
            };
            if let Err(error) = written {
                skip_frames(error, 1, &mut skipped)?;
            }

            session.advance(index as f64 / total as f64);
        }
        Ok(skipped)
    }

    /// `steps + 1` cross-dissolve frames per adjacent pair.
    async fn encode_morph(
        &self,
        photos: &[Photo],
        steps: u32,
        writer: &mut FrameWriter,
        frames: &mut FrameSource,
        session: &mut RenderSession,
        token: &CancellationToken,
    ) -> RenderResult<u64> {
        let pairs = photos.len() - 1;
        let frames_per_pair = u64::from(steps) + 1;
        let mut skipped = 0;
        let mut carried: Option<FrameBuffer> = None;

        for (i, pair) in photos.windows(2).enumerate() {
            if token.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            self.relieve_pressure(&mut frames.pool);

            let from = match carried.take() {
                Some(frame) => Ok(frame),
                None => self.load_frame(&pair[0], frames).await,
            };
            let to = self.load_frame(&pair[1], frames).await;

            match (from, to) {
                (Ok(from), Ok(to)) => {
                    for step in 0..=steps {
                        if token.is_cancelled() {
                            return Err(RenderError::Cancelled);
                        }
                        let mut frame = frames.pool.checkout()?;
                        let result = match blend_into(&mut frame, &from, &to, morph_alpha(step, steps)) {
                            Ok(()) => writer.write(&frame, token).await.map(|_| ()),
                            Err(error) => Err(error),
                        };
                        frames.pool.give_back(frame);
                        if let Err(error) = result {
                            skip_frames(error, 1, &mut skipped)?;
                        }
                    }
                    frames.pool.give_back(from);
                    carried = Some(to);
                }
                (from, to) => {
                    let error = from
                        .as_ref()
                        .err()
                        .or(to.as_ref().err())
                        .cloned()
                        .unwrap_or_else(|| RenderError::frame("photo pair unavailable"));
                    if let Ok(frame) = from {
                        frames.pool.give_back(frame);
                    }
                    if let Ok(frame) = to {
                        carried = Some(frame);
                    }
                    skip_frames(error, frames_per_pair, &mut skipped)?;
                }
            }

            session.advance(i as f64 / pairs as f64);
        }

        if let Some(frame) = carried {
            frames.pool.give_back(frame);
        }
        Ok(skipped)
    }

    fn relieve_pressure(&self, pool: &mut BufferPool) {
        let level = self
            .memory
            .as_ref()
            .map(|memory| *memory.borrow())
            .unwrap_or_default();
        if level == MemoryLevel::Critical {
            pool.trim();
        }
    }

    async fn decode(&self, photo: &Photo) -> RenderResult<DynamicImage> {
        let store = self.store.clone();
        let photo = photo.clone();
        tokio::task::spawn_blocking(move || {
            store
                .load(&photo)
                .map_err(|e| RenderError::frame(format!("photo {}: {e}", photo.id)))
        })
        .await
        .map_err(|e| RenderError::frame(format!("decode task failed: {e}")))?
    }

    /// Decode `photo` and scale it into a pooled buffer.
    ///
    /// No buffer is checked out when decoding fails.
    async fn load_frame(&self, photo: &Photo, frames: &mut FrameSource) -> RenderResult<FrameBuffer> {
        let image = match frames.take_first(photo) {
            Some(image) => image,
            None => self.decode(photo).await?,
        };
        let mut buffer = frames.pool.checkout()?;
        tokio::task::spawn_blocking(move || {
            buffer.fill_from_image(&image);
            buffer
        })
        .await
        .map_err(|e| RenderError::frame(format!("scale task failed: {e}")))
    }
}

/// Buffers for one render, plus the first photo decoded during setup.
struct FrameSource {
    pool: BufferPool,
    first: Option<(PhotoId, DynamicImage)>,
}

impl FrameSource {
    fn take_first(&mut self, photo: &Photo) -> Option<DynamicImage> {
        match self.first.take() {
            Some((id, image)) if id == photo.id => Some(image),
            _ => None,
        }
    }
}

/// Count `frames` as skipped if `error` is per-frame, else propagate it.
fn skip_frames(error: RenderError, frames: u64, skipped: &mut u64) -> RenderResult<()> {
    if error.is_fatal() {
        return Err(error);
    }
    tracing::warn!(error = %error, frames, "Skipping frame");
    *skipped += frames;
    Ok(())
}

/// Marks an output path as being written by a render.
struct OutputLease<'a> {
    active: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl<'a> OutputLease<'a> {
    fn acquire(active: &'a Mutex<HashSet<PathBuf>>, path: &Path) -> RenderResult<Self> {
        let mut paths = active.lock().unwrap_or_else(PoisonError::into_inner);
        if !paths.insert(path.to_path_buf()) {
            return Err(RenderError::setup(format!(
                "output {} is already being rendered",
                path.display()
            )));
        }
        Ok(Self {
            active,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for OutputLease<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

fn prepare_output(path: &Path) -> RenderResult<()> {
    ensure_parent_dir(path)?;
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed existing output file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RenderError::setup(format!(
            "cannot replace {}: {e}",
            path.display()
        ))),
    }
}

fn discard_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial output"),
    }
}

#[cfg(unix)]
fn set_output_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
        tracing::warn!(path = %path.display(), error = %e, "Failed to set output permissions");
    }
}

#[cfg(not(unix))]
fn set_output_permissions(_path: &Path) {}
