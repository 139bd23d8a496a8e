#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use image::{DynamicImage, Rgb, RgbImage};
use lapse_common::{ImportError, ProgressSink};
use lapse_import_engine::AssetSource;
use lapse_photo_model::{FetchQuality, MediaKind, SourceAssetRef, TargetSize};

pub type FetchHook = Box<dyn Fn(&SourceAssetRef) + Send + Sync>;

/// A fetch observed by [`ScriptedSource`].
#[derive(Debug, Clone)]
pub struct FetchCall {
    pub id: String,
    pub quality: FetchQuality,
    pub target: TargetSize,
    /// Fetches in flight when this one started, itself included.
    pub in_flight: usize,
}

/// Asset source whose failures, latency and side effects are scripted per asset.
#[derive(Default)]
pub struct ScriptedSource {
    failures: Mutex<HashMap<String, u32>>,
    hangs: Mutex<Vec<String>>,
    calls: Mutex<Vec<FetchCall>>,
    in_flight: AtomicUsize,
    latency: Duration,
    hook: Option<FetchHook>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `times` fetches of `id`.
    pub fn failing(self, id: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(id.to_string(), times);
        self
    }

    /// Never complete fetches of `id`.
    pub fn hanging(self, id: &str) -> Self {
        self.hangs.lock().unwrap().push(id.to_string());
        self
    }

    pub fn on_fetch(mut self, hook: impl Fn(&SourceAssetRef) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: &str) -> Vec<FetchCall> {
        self.calls().into_iter().filter(|c| c.id == id).collect()
    }
}

#[async_trait]
impl AssetSource for ScriptedSource {
    async fn fetch(
        &self,
        asset: &SourceAssetRef,
        target: TargetSize,
        quality: FetchQuality,
    ) -> Result<DynamicImage, ImportError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().unwrap().push(FetchCall {
            id: asset.id.to_string(),
            quality,
            target,
            in_flight,
        });

        if let Some(hook) = &self.hook {
            hook(asset);
        }
        let hang = self.hangs.lock().unwrap().contains(&asset.id.to_string());
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(asset.id.as_str()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ImportError::load_failed(format!("scripted failure for {}", asset.id)));
            }
        }
        let shade = (asset.created_at.timestamp() % 255) as u8;
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            target.width.min(512),
            target.height.min(384),
            Rgb([shade, shade, shade]),
        )))
    }
}

pub fn asset_id(i: usize) -> String {
    format!("asset-{i:03}")
}

pub fn created(i: usize) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap()
}

/// `n` image assets with increasing creation times.
pub fn assets(n: usize) -> Vec<SourceAssetRef> {
    (0..n)
        .map(|i| SourceAssetRef::image(asset_id(i), 4032, 3024, created(i)))
        .collect()
}

pub fn video(i: usize) -> SourceAssetRef {
    SourceAssetRef {
        kind: MediaKind::Video,
        ..SourceAssetRef::image(asset_id(i), 1920, 1080, created(i))
    }
}

/// Records every progress update.
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
}

impl ProgressSink for RecordingProgress {
    fn update(&self, status: &str, fraction: f64) {
        self.updates
            .lock()
            .unwrap()
            .push((status.to_string(), fraction));
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
