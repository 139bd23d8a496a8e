//! Keyed photo storage.
//!
//! A [`FilePhotoStore`] keeps an `index.json` next to a `photos/` directory
//! of JPEG files. The index is rewritten through a temporary file after every
//! change so a crash never leaves a half-written index behind.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use lapse_common::LapseError;
use serde::{Deserialize, Serialize};

use crate::asset::AssetId;
use crate::photo::{sort_by_capture_time, Photo, PhotoId};

/// JPEG quality used for stored images.
pub const JPEG_QUALITY: u8 = 80;

const INDEX_FILE: &str = "index.json";
const PHOTOS_DIR: &str = "photos";
const INDEX_VERSION: &str = "1.0";

/// Errors raised by photo stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Image error for {path}: {message}")]
    ImageError { path: PathBuf, message: String },

    #[error("Photo {id} not found")]
    NotFound { id: PhotoId },
}

impl From<StoreError> for LapseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } | StoreError::ImageError { .. } => {
                LapseError::store(err.to_string())
            }
            StoreError::IoError { source, .. } => LapseError::Io(source),
            StoreError::ParseError { source, .. } => LapseError::Json(source),
        }
    }
}

/// Durable keyed storage for imported photos.
///
/// Implementations are shared between the import scheduler, the quality
/// upgrade pass and the render engine, so every method takes `&self`.
pub trait PhotoStore: Send + Sync {
    /// Store a new image and create its photo record.
    fn append(
        &self,
        image: &DynamicImage,
        captured_at: DateTime<Utc>,
        source: Option<&AssetId>,
    ) -> Result<Photo, StoreError>;

    /// Delete a photo and its image.
    fn remove(&self, id: PhotoId) -> Result<(), StoreError>;

    /// Decode the stored image of a photo.
    fn load(&self, photo: &Photo) -> Result<DynamicImage, StoreError>;

    /// Overwrite the stored image of an existing photo, keeping its ID and capture time.
    fn replace(&self, id: PhotoId, image: &DynamicImage) -> Result<Photo, StoreError>;

    /// All photos, oldest capture first.
    fn list(&self) -> Result<Vec<Photo>, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreIndex {
    version: String,
    next_id: u64,
    photos: Vec<Photo>,
}

impl Default for StoreIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            next_id: 1,
            photos: Vec::new(),
        }
    }
}

impl StoreIndex {
    fn allocate_id(&mut self) -> PhotoId {
        let id = PhotoId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn position(&self, id: PhotoId) -> Result<usize, StoreError> {
        self.photos
            .iter()
            .position(|p| p.id == id)
            .ok_or(StoreError::NotFound { id })
    }
}

/// Photo store backed by a directory on disk.
#[derive(Debug)]
pub struct FilePhotoStore {
    root: PathBuf,
    index: Mutex<StoreIndex>,
}

impl FilePhotoStore {
    /// Open the store at `root`, creating its layout when missing.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let photos_dir = root.join(PHOTOS_DIR);
        std::fs::create_dir_all(&photos_dir).map_err(|e| StoreError::IoError {
            path: photos_dir.clone(),
            source: e,
        })?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let json = std::fs::read_to_string(&index_path).map_err(|e| StoreError::IoError {
                path: index_path.clone(),
                source: e,
            })?;
            serde_json::from_str(&json).map_err(|e| StoreError::ParseError {
                path: index_path.clone(),
                source: e,
            })?
        } else {
            StoreIndex::default()
        };

        tracing::debug!(root = %root.display(), photos = index.photos.len(), "Photo store opened");
        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of stored photos.
    pub fn len(&self) -> usize {
        self.lock().photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, StoreIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save_index(&self, index: &StoreIndex) -> Result<(), StoreError> {
        let index_path = self.root.join(INDEX_FILE);
        let tmp_path = self.root.join(format!("{INDEX_FILE}.tmp"));
        let json = serde_json::to_string_pretty(index).map_err(|e| StoreError::ParseError {
            path: index_path.clone(),
            source: e,
        })?;
        std::fs::write(&tmp_path, json).map_err(|e| StoreError::IoError {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &index_path).map_err(|e| StoreError::IoError {
            path: index_path,
            source: e,
        })
    }
}

impl PhotoStore for FilePhotoStore {
    fn append(
        &self,
        image: &DynamicImage,
        captured_at: DateTime<Utc>,
        source: Option<&AssetId>,
    ) -> Result<Photo, StoreError> {
        let mut index = self.lock();
        let id = index.allocate_id();
        let image_file = format!("{PHOTOS_DIR}/{:08}.jpg", id.as_u64());
        write_jpeg(&self.root.join(&image_file), image)?;

        let photo = Photo {
            id,
            captured_at,
            image_file,
            width: image.width(),
            height: image.height(),
            source: source.cloned(),
        };
        index.photos.push(photo.clone());
        self.save_index(&index)?;
        tracing::debug!(id = %photo.id, width = photo.width, height = photo.height, "Photo stored");
        Ok(photo)
    }

    fn remove(&self, id: PhotoId) -> Result<(), StoreError> {
        let mut index = self.lock();
        let pos = index.position(id)?;
        let photo = index.photos.remove(pos);
        self.save_index(&index)?;

        let path = self.root.join(&photo.image_file);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(id = %id, path = %path.display(), "Stored image already missing");
            }
            Err(e) => return Err(StoreError::IoError { path, source: e }),
        }
        tracing::info!(id = %id, "Photo deleted");
        Ok(())
    }

    fn load(&self, photo: &Photo) -> Result<DynamicImage, StoreError> {
        let path = self.root.join(&photo.image_file);
        image::open(&path).map_err(|e| StoreError::ImageError {
            path,
            message: e.to_string(),
        })
    }

    fn replace(&self, id: PhotoId, image: &DynamicImage) -> Result<Photo, StoreError> {
        let mut index = self.lock();
        let pos = index.position(id)?;
        let path = self.root.join(&index.photos[pos].image_file);
        write_jpeg(&path, image)?;

        let photo = &mut index.photos[pos];
        photo.width = image.width();
        photo.height = image.height();
        let updated = photo.clone();
        self.save_index(&index)?;
        Ok(updated)
    }

    fn list(&self) -> Result<Vec<Photo>, StoreError> {
        let mut photos = self.lock().photos.clone();
        sort_by_capture_time(&mut photos);
        Ok(photos)
    }
}

fn write_jpeg(path: &Path, image: &DynamicImage) -> Result<(), StoreError> {
    let file = File::create(path).map_err(|e| StoreError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    let rgb = image.to_rgb8();
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| StoreError::ImageError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    writer.flush().map_err(|e| StoreError::IoError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Photo store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryPhotoStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    photos: Vec<Photo>,
    images: HashMap<PhotoId, DynamicImage>,
}

impl MemoryPhotoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PhotoStore for MemoryPhotoStore {
    fn append(
        &self,
        image: &DynamicImage,
        captured_at: DateTime<Utc>,
        source: Option<&AssetId>,
    ) -> Result<Photo, StoreError> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = PhotoId::new(state.next_id);
        let photo = Photo {
            id,
            captured_at,
            image_file: format!("memory/{id}"),
            width: image.width(),
            height: image.height(),
            source: source.cloned(),
        };
        state.photos.push(photo.clone());
        state.images.insert(id, image.clone());
        Ok(photo)
    }

    fn remove(&self, id: PhotoId) -> Result<(), StoreError> {
        let mut state = self.lock();
        let before = state.photos.len();
        state.photos.retain(|p| p.id != id);
        if state.photos.len() == before {
            return Err(StoreError::NotFound { id });
        }
        state.images.remove(&id);
        Ok(())
    }

    fn load(&self, photo: &Photo) -> Result<DynamicImage, StoreError> {
        self.lock()
            .images
            .get(&photo.id)
            .cloned()
            .ok_or(StoreError::NotFound { id: photo.id })
    }

    fn replace(&self, id: PhotoId, image: &DynamicImage) -> Result<Photo, StoreError> {
        let mut state = self.lock();
        let photo = state
            .photos
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound { id })?;
        photo.width = image.width();
        photo.height = image.height();
        let updated = photo.clone();
        state.images.insert(id, image.clone());
        Ok(updated)
    }

    fn list(&self) -> Result<Vec<Photo>, StoreError> {
        let mut photos = self.lock().photos.clone();
        sort_by_capture_time(&mut photos);
        Ok(photos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32, shade: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([shade, shade, shade])))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn temp_store(name: &str) -> (PathBuf, FilePhotoStore) {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        let store = FilePhotoStore::open(&dir).unwrap();
        (dir, store)
    }

    #[test]
    fn test_file_store_append_and_reopen() {
        let (dir, store) = temp_store("lapse_test_store_reopen");
        let source = AssetId::new("IMG_0001");
        let photo = store.append(&solid(32, 24, 200), at(100), Some(&source)).unwrap();
        assert_eq!(photo.dimensions(), (32, 24));
        assert!(dir.join(&photo.image_file).exists());

        let reopened = FilePhotoStore::open(&dir).unwrap();
        let listed = reopened.list().unwrap();
        assert_eq!(listed, vec![photo.clone()]);

        let decoded = reopened.load(&photo).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_store_ids_survive_deletes() {
        let (dir, store) = temp_store("lapse_test_store_ids");
        let first = store.append(&solid(8, 8, 10), at(1), None).unwrap();
        store.remove(first.id).unwrap();
        assert!(!dir.join(&first.image_file).exists());

        let second = store.append(&solid(8, 8, 20), at(2), None).unwrap();
        assert!(second.id > first.id);
        assert!(matches!(
            store.remove(first.id),
            Err(StoreError::NotFound { .. })
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_store_replace_keeps_identity() {
        let (dir, store) = temp_store("lapse_test_store_replace");
        let photo = store.append(&solid(16, 12, 50), at(5), None).unwrap();
        let upgraded = store.replace(photo.id, &solid(64, 48, 50)).unwrap();

        assert_eq!(upgraded.id, photo.id);
        assert_eq!(upgraded.captured_at, photo.captured_at);
        assert_eq!(upgraded.dimensions(), (64, 48));
        assert_eq!(store.load(&upgraded).unwrap().width(), 64);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_list_orders_by_capture_time() {
        let store = MemoryPhotoStore::new();
        store.append(&solid(2, 2, 0), at(30), None).unwrap();
        store.append(&solid(2, 2, 0), at(10), None).unwrap();
        store.append(&solid(2, 2, 0), at(20), None).unwrap();

        let times: Vec<i64> = store
            .list()
            .unwrap()
            .iter()
            .map(|p| p.captured_at.timestamp())
            .collect();
        assert_eq!(times, vec![10, 20, 30]);
    }

    #[test]
    fn test_memory_store_remove_unknown() {
        let store = MemoryPhotoStore::new();
        let err = store.remove(PhotoId::new(9)).unwrap_err();
        assert_eq!(err.to_string(), "Photo 9 not found");
        let lapse: LapseError = err.into();
        assert!(matches!(lapse, LapseError::Store { .. }));
    }
}
