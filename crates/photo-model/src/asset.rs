//! References to images owned by an external asset library.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of an asset in the external library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of media behind an asset. Only images are imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

/// Read-only reference to an image that has not been decoded yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAssetRef {
    pub id: AssetId,

    /// Full pixel dimensions of the original.
    pub pixel_width: u32,
    pub pixel_height: u32,

    /// When the asset was created (used as the photo capture time).
    pub created_at: DateTime<Utc>,

    pub kind: MediaKind,
}

impl SourceAssetRef {
    /// Reference to an image asset.
    pub fn image(
        id: impl Into<String>,
        pixel_width: u32,
        pixel_height: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AssetId::new(id),
            pixel_width,
            pixel_height,
            created_at,
            kind: MediaKind::Image,
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind == MediaKind::Image
    }

    /// Width over height; square when either dimension is unknown.
    pub fn aspect_ratio(&self) -> f64 {
        if self.pixel_width == 0 || self.pixel_height == 0 {
            return 1.0;
        }
        self.pixel_width as f64 / self.pixel_height as f64
    }

    /// Size that fits `width` while keeping the asset's aspect ratio.
    pub fn target_size_for_width(&self, width: u32) -> TargetSize {
        let width = width.max(1);
        let height = (width as f64 / self.aspect_ratio()).round().max(1.0) as u32;
        TargetSize { width, height }
    }
}

/// Requested decode size, fitted inside with aspect ratio preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Decode quality requested from the asset source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchQuality {
    /// Cheap, possibly degraded decode for quick display.
    Fast,
    /// Full-quality decode.
    High,
}
