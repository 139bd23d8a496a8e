//! Asset sources: where imported images come from.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::DynamicImage;
use lapse_common::{ImportError, LapseError, LapseResult};
use lapse_photo_model::{AssetId, FetchQuality, MediaKind, SourceAssetRef, TargetSize};
use walkdir::WalkDir;

/// Decodes referenced assets into pixels.
///
/// A fetch may take arbitrarily long; callers wrap it in their own timeout
/// and cancellation handling.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(
        &self,
        asset: &SourceAssetRef,
        target: TargetSize,
        quality: FetchQuality,
    ) -> Result<DynamicImage, ImportError>;
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "webm"];

/// Asset source over the image files of a directory tree.
///
/// Asset IDs are paths relative to the root.
#[derive(Debug, Clone)]
pub struct DirectoryAssetSource {
    root: PathBuf,
}

impl DirectoryAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate media under the root, oldest first (ties broken by path).
    ///
    /// Videos are listed with [`MediaKind::Video`] so the scheduler can skip
    /// them; other files are ignored.
    pub fn scan(&self) -> LapseResult<Vec<SourceAssetRef>> {
        if !self.root.is_dir() {
            return Err(LapseError::FileNotFound {
                path: self.root.clone(),
            });
        }

        let mut found: Vec<(DateTime<Utc>, String, SourceAssetRef)> = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(kind) = media_kind(entry.path()) else {
                continue;
            };
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let id = relative.to_string_lossy().replace('\\', "/");

            let created_at = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH));

            let (pixel_width, pixel_height) = match kind {
                MediaKind::Image => image::image_dimensions(entry.path()).unwrap_or_else(|e| {
                    tracing::debug!(path = %entry.path().display(), error = %e, "Could not read image header");
                    (0, 0)
                }),
                _ => (0, 0),
            };

            found.push((
                created_at,
                id.clone(),
                SourceAssetRef {
                    id: AssetId::new(id),
                    pixel_width,
                    pixel_height,
                    created_at,
                    kind,
                },
            ));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        tracing::info!(root = %self.root.display(), assets = found.len(), "Scanned asset directory");
        Ok(found.into_iter().map(|(_, _, asset)| asset).collect())
    }

    fn path_of(&self, asset: &SourceAssetRef) -> Result<PathBuf, ImportError> {
        let relative = Path::new(asset.id.as_str());
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ImportError::load_failed(format!(
                "asset id escapes the source directory: {}",
                asset.id
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AssetSource for DirectoryAssetSource {
    async fn fetch(
        &self,
        asset: &SourceAssetRef,
        target: TargetSize,
        quality: FetchQuality,
    ) -> Result<DynamicImage, ImportError> {
        if !asset.is_image() {
            return Err(ImportError::load_failed(format!(
                "{} is not an image",
                asset.id
            )));
        }
        let path = self.path_of(asset)?;

        tokio::task::spawn_blocking(move || -> Result<DynamicImage, ImportError> {
            let image = image::open(&path)
                .map_err(|e| ImportError::load_failed(format!("{}: {e}", path.display())))?;
            Ok(fit_within(image, target, quality))
        })
        .await
        .map_err(|e| ImportError::load_failed(format!("decode task failed: {e}")))?
    }
}

/// Downscale `image` to fit inside `target`. Never upscales.
pub fn fit_within(image: DynamicImage, target: TargetSize, quality: FetchQuality) -> DynamicImage {
    let (w, h) = (target.width.max(1), target.height.max(1));
    if image.width() <= w && image.height() <= h {
        return image;
    }
    match quality {
        FetchQuality::Fast => image.thumbnail(w, h),
        FetchQuality::High => image.resize(w, h, FilterType::Lanczos3),
    }
}

fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}
