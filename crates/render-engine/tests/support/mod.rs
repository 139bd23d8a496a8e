#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use image::{DynamicImage, Rgb, RgbImage};
use lapse_common::{FrameTime, RenderConfig, RenderError, RenderResult};
use lapse_photo_model::{AssetId, MemoryPhotoStore, Photo, PhotoId, PhotoStore, StoreError};
use lapse_render_engine::{EncoderConfig, EncoderFactory, EncoderSession, FrameBuffer};

pub type FrameHook = Arc<dyn Fn(u64) + Send + Sync>;

/// What a [`RecordingEncoder`] saw.
#[derive(Default)]
pub struct Recording {
    pub opened: Mutex<Vec<EncoderConfig>>,
    /// Presentation time and top-left BGRA pixel of every appended frame.
    pub frames: Mutex<Vec<(FrameTime, [u8; 4])>>,
    pub not_ready_polls: AtomicUsize,
    pub finished: AtomicBool,
    pub aborted: AtomicBool,
}

impl Recording {
    pub fn times(&self) -> Vec<u64> {
        self.frames.lock().unwrap().iter().map(|(t, _)| t.value).collect()
    }

    pub fn pixels(&self) -> Vec<[u8; 4]> {
        self.frames.lock().unwrap().iter().map(|(_, p)| *p).collect()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

/// Encoder double that records frames and creates an empty output file.
#[derive(Clone, Default)]
pub struct RecordingEncoder {
    pub recording: Arc<Recording>,
    busy_polls: usize,
    fail_open: bool,
    fail_finish: bool,
    hook: Option<FrameHook>,
}

impl RecordingEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report not-ready this many times before accepting each frame.
    pub fn busy(mut self, polls: usize) -> Self {
        self.busy_polls = polls;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    /// Called with each frame's index after it is appended.
    pub fn on_frame(mut self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }
}

impl EncoderFactory for RecordingEncoder {
    fn open(&self, config: &EncoderConfig) -> RenderResult<Box<dyn EncoderSession>> {
        if self.fail_open {
            return Err(RenderError::export("encoder unavailable"));
        }
        std::fs::write(&config.output_path, b"")
            .map_err(|e| RenderError::setup(e.to_string()))?;
        self.recording.opened.lock().unwrap().push(config.clone());
        Ok(Box::new(RecordingSession {
            recording: self.recording.clone(),
            busy_polls: self.busy_polls,
            remaining: AtomicUsize::new(0),
            fail_finish: self.fail_finish,
            hook: self.hook.clone(),
        }))
    }
}

struct RecordingSession {
    recording: Arc<Recording>,
    busy_polls: usize,
    remaining: AtomicUsize,
    fail_finish: bool,
    hook: Option<FrameHook>,
}

impl EncoderSession for RecordingSession {
    fn is_ready(&self) -> bool {
        if self.remaining.load(Ordering::SeqCst) == 0 {
            return true;
        }
        self.remaining.fetch_sub(1, Ordering::SeqCst);
        self.recording.not_ready_polls.fetch_add(1, Ordering::SeqCst);
        false
    }

    fn append(&mut self, frame: &FrameBuffer, time: FrameTime) -> RenderResult<()> {
        let pixel = frame.pixel(0, 0).unwrap_or_default();
        self.recording.frames.lock().unwrap().push((time, pixel));
        self.remaining.store(self.busy_polls, Ordering::SeqCst);
        if let Some(hook) = &self.hook {
            hook(time.value);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> RenderResult<()> {
        if self.fail_finish {
            return Err(RenderError::export("muxer failed"));
        }
        self.recording.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn abort(self: Box<Self>) {
        self.recording.aborted.store(true, Ordering::SeqCst);
    }
}

/// Collects every progress update.
#[derive(Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<(String, f64)>>,
}

impl RecordingProgress {
    pub fn updates(&self) -> Vec<(String, f64)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<(String, f64)> {
        self.updates.lock().unwrap().last().cloned()
    }

    pub fn fractions(&self) -> Vec<f64> {
        self.updates().into_iter().map(|(_, f)| f).collect()
    }
}

impl lapse_common::ProgressSink for RecordingProgress {
    fn update(&self, status: &str, fraction: f64) {
        self.updates
            .lock()
            .unwrap()
            .push((status.to_string(), fraction));
    }
}

pub fn captured(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + chrono::Duration::days(i as i64)
}

/// Gray level of photo `i`.
pub fn shade(i: usize) -> u8 {
    (i * 20 % 250) as u8 + 5
}

/// A store holding `n` solid gray photos of `width`x`height`, oldest first.
pub fn library(n: usize, width: u32, height: u32) -> (Arc<MemoryPhotoStore>, Vec<Photo>) {
    let store = Arc::new(MemoryPhotoStore::new());
    let photos = (0..n)
        .map(|i| {
            let s = shade(i);
            let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([s, s, s])));
            store.append(&image, captured(i), None).unwrap()
        })
        .collect();
    (store, photos)
}

/// Photo store that counts decodes.
pub struct CountingStore {
    inner: Arc<MemoryPhotoStore>,
    pub loads: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<MemoryPhotoStore>) -> Self {
        Self {
            inner,
            loads: AtomicUsize::new(0),
        }
    }
}

impl PhotoStore for CountingStore {
    fn append(
        &self,
        image: &DynamicImage,
        captured_at: DateTime<Utc>,
        source: Option<&AssetId>,
    ) -> Result<Photo, StoreError> {
        self.inner.append(image, captured_at, source)
    }

    fn remove(&self, id: PhotoId) -> Result<(), StoreError> {
        self.inner.remove(id)
    }

    fn load(&self, photo: &Photo) -> Result<DynamicImage, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(photo)
    }

    fn replace(&self, id: PhotoId, image: &DynamicImage) -> Result<Photo, StoreError> {
        self.inner.replace(id, image)
    }

    fn list(&self) -> Result<Vec<Photo>, StoreError> {
        self.inner.list()
    }
}

pub fn test_config() -> RenderConfig {
    RenderConfig {
        ready_poll_ms: 1,
        ready_timeout_ms: 5_000,
        ..RenderConfig::default()
    }
}

/// Fresh output directory for one test.
pub fn out_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "lapse-render-{name}-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}
