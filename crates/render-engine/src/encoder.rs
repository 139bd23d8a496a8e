//! Encoder sessions and the frame writer that feeds them.

use std::path::PathBuf;
use std::time::Duration;

use lapse_common::{
    CancellationToken, FrameClock, FrameTime, RenderConfig, RenderError, RenderResult,
};

use crate::frame::FrameBuffer;

/// Parameters of one encoded output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_bps: u64,
    pub keyframe_interval: u32,
    /// Frames that may be queued before the session reports not-ready.
    pub queue_depth: usize,
    pub output_path: PathBuf,
}

impl EncoderConfig {
    pub fn new(
        width: u32,
        height: u32,
        fps: u32,
        render: &RenderConfig,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            width,
            height,
            fps,
            bitrate_bps: render.bitrate_bps,
            keyframe_interval: render.keyframe_interval,
            queue_depth: render.encoder_queue_depth,
            output_path: output_path.into(),
        }
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::setup("encoder width/height must be non-zero"));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(RenderError::setup(
                "encoder width/height must be even (required for yuv420p output)",
            ));
        }
        if self.fps == 0 {
            return Err(RenderError::setup("encoder fps must be non-zero"));
        }
        Ok(())
    }
}

/// An open output file accepting frames in presentation order.
pub trait EncoderSession: Send {
    /// Whether the session can take another frame without blocking.
    fn is_ready(&self) -> bool;

    /// Queue one frame for encoding.
    fn append(&mut self, frame: &FrameBuffer, time: FrameTime) -> RenderResult<()>;

    /// Mark input complete, flush and close the file.
    fn finish(self: Box<Self>) -> RenderResult<()>;

    /// Stop encoding without finalizing the file.
    fn abort(self: Box<Self>);
}

/// Opens encoder sessions.
pub trait EncoderFactory: Send + Sync {
    fn open(&self, config: &EncoderConfig) -> RenderResult<Box<dyn EncoderSession>>;
}

/// The only way frames reach an encoder session.
///
/// Owns the session and the frame clock, so frames are appended with
/// strictly increasing, contiguous presentation times.
pub struct FrameWriter {
    session: Box<dyn EncoderSession>,
    clock: FrameClock,
    poll: Duration,
    ready_timeout: Duration,
}

impl FrameWriter {
    pub fn new(
        session: Box<dyn EncoderSession>,
        fps: u32,
        poll: Duration,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            session,
            clock: FrameClock::new(fps),
            poll,
            ready_timeout,
        }
    }

    /// Wait for the encoder, then append `frame` at the next presentation time.
    pub async fn write(
        &mut self,
        frame: &FrameBuffer,
        token: &CancellationToken,
    ) -> RenderResult<FrameTime> {
        self.wait_ready(token).await?;
        let time = self.clock.peek();
        self.session.append(frame, time)?;
        Ok(self.clock.tick())
    }

    async fn wait_ready(&mut self, token: &CancellationToken) -> RenderResult<()> {
        let started = tokio::time::Instant::now();
        loop {
            if token.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            if self.session.is_ready() {
                return Ok(());
            }
            if started.elapsed() >= self.ready_timeout {
                return Err(RenderError::export(format!(
                    "encoder not ready after {:?}",
                    self.ready_timeout
                )));
            }
            if !token.sleep(self.poll).await {
                return Err(RenderError::Cancelled);
            }
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.clock.frames_emitted()
    }

    pub fn duration_secs(&self) -> f64 {
        self.clock.duration_secs()
    }

    /// Finalize the output. Returns the number of frames written.
    pub fn finish(self) -> RenderResult<u64> {
        let frames = self.clock.frames_emitted();
        self.session.finish().map_err(|e| match e {
            RenderError::ExportFailed { .. } => e,
            other => RenderError::export(other.to_string()),
        })?;
        Ok(frames)
    }

    pub fn abort(self) {
        self.session.abort();
    }
}
