//! H.264 encoding through a system `ffmpeg` process.
//!
//! Frames are piped as raw BGRA. A writer thread drains a bounded queue into
//! ffmpeg's stdin; the session is ready while that queue has room.

use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use lapse_common::{FrameTime, RenderError, RenderResult};

use crate::encoder::{EncoderConfig, EncoderFactory, EncoderSession};
use crate::frame::FrameBuffer;

/// Whether an `ffmpeg` binary can be run from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Create the parent directory of `path` if needed.
pub fn ensure_parent_dir(path: &Path) -> RenderResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            RenderError::setup(format!(
                "failed to create output directory '{}': {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}

/// Command line for one encode.
pub fn ffmpeg_args(config: &EncoderConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "-y",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "bgra",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.extend([
        "-s".to_string(),
        format!("{}x{}", config.width, config.height),
        "-r".to_string(),
        config.fps.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-b:v".to_string(),
        config.bitrate_bps.to_string(),
        "-g".to_string(),
        config.keyframe_interval.max(1).to_string(),
        // No B-frames: presentation order equals decode order.
        "-bf".to_string(),
        "0".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        config.output_path.to_string_lossy().into_owned(),
    ]);
    args
}

/// Opens [`FfmpegSession`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegEncoderFactory;

impl EncoderFactory for FfmpegEncoderFactory {
    fn open(&self, config: &EncoderConfig) -> RenderResult<Box<dyn EncoderSession>> {
        Ok(Box::new(FfmpegSession::spawn(config)?))
    }
}

pub struct FfmpegSession {
    child: Child,
    frames: Option<SyncSender<Vec<u8>>>,
    pending: Arc<AtomicUsize>,
    queue_depth: usize,
    frame_len: usize,
    write_error: Arc<Mutex<Option<String>>>,
    writer: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegSession {
    pub fn spawn(config: &EncoderConfig) -> RenderResult<Self> {
        config.validate()?;
        ensure_parent_dir(&config.output_path)?;

        let args = ffmpeg_args(config);
        tracing::debug!(args = ?args, "Running ffmpeg");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RenderError::setup(format!(
                    "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
                ))
            })?;

        tracing::info!(
            pid = child.id(),
            width = config.width,
            height = config.height,
            fps = config.fps,
            output = %config.output_path.display(),
            "ffmpeg process started"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RenderError::setup("failed to open ffmpeg stdin"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RenderError::setup("failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let queue_depth = config.queue_depth.max(1);
        let (tx, rx) = sync_channel::<Vec<u8>>(queue_depth);
        let pending = Arc::new(AtomicUsize::new(0));
        let write_error = Arc::new(Mutex::new(None));

        let writer = {
            let pending = pending.clone();
            let write_error = write_error.clone();
            std::thread::spawn(move || pump_frames(stdin, rx, &pending, &write_error))
        };

        let frame_len = crate::frame::frame_len(config.width, config.height)
            .ok_or_else(|| RenderError::setup("frame size overflows"))?;

        Ok(Self {
            child,
            frames: Some(tx),
            pending,
            queue_depth,
            frame_len,
            write_error,
            writer: Some(writer),
            stderr: Some(stderr_task),
        })
    }

    /// Process ID of the ffmpeg child.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn take_write_error(&self) -> Option<String> {
        self.write_error.lock().ok().and_then(|mut e| e.take())
    }

    fn join_threads(&mut self) -> String {
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        self.stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }

    /// Kill ffmpeg before closing its input so it never finalizes a partial file.
    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "ffmpeg already exited");
        }
        drop(self.frames.take());
        let _ = self.child.wait();
        self.join_threads();
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        if self.frames.is_some() {
            tracing::warn!(pid = self.child.id(), "ffmpeg session dropped mid-export, killing encoder");
            self.kill();
        }
    }
}

fn pump_frames(
    mut stdin: ChildStdin,
    frames: std::sync::mpsc::Receiver<Vec<u8>>,
    pending: &AtomicUsize,
    write_error: &Mutex<Option<String>>,
) {
    for frame in frames {
        let result = stdin.write_all(&frame);
        pending.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = result {
            if let Ok(mut slot) = write_error.lock() {
                *slot = Some(format!("failed to write frame to ffmpeg stdin: {e}"));
            }
            return;
        }
    }
    let _ = stdin.flush();
}

impl EncoderSession for FfmpegSession {
    fn is_ready(&self) -> bool {
        self.pending.load(Ordering::SeqCst) < self.queue_depth
    }

    fn append(&mut self, frame: &FrameBuffer, _time: FrameTime) -> RenderResult<()> {
        // Timestamps are implied by the constant input rate passed to ffmpeg.
        if let Some(message) = self.take_write_error() {
            return Err(RenderError::export(message));
        }
        if frame.as_bytes().len() != self.frame_len {
            return Err(RenderError::frame(format!(
                "frame of {} bytes does not match the encoder's {}",
                frame.as_bytes().len(),
                self.frame_len
            )));
        }
        let Some(frames) = self.frames.as_ref() else {
            return Err(RenderError::export("ffmpeg encoder is already finalized"));
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        frames.send(frame.as_bytes().to_vec()).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            RenderError::export("ffmpeg writer thread has stopped")
        })
    }

    fn finish(mut self: Box<Self>) -> RenderResult<()> {
        drop(self.frames.take());
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        let write_error = self.take_write_error();

        let status = self
            .child
            .wait()
            .map_err(|e| RenderError::export(format!("failed to wait for ffmpeg to finish: {e}")))?;
        let stderr = self.join_threads();

        if !status.success() {
            return Err(RenderError::export(format!(
                "ffmpeg exited with status {status}: {}",
                stderr.trim()
            )));
        }
        if let Some(message) = write_error {
            return Err(RenderError::export(message));
        }
        tracing::info!("ffmpeg export complete");
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        self.kill();
        tracing::info!("ffmpeg export aborted");
    }
}
