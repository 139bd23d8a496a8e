//! Photos held in the local library.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::AssetId;

/// Library-assigned photo identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(u64);

impl PhotoId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PhotoId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// A successfully imported image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,

    /// When the picture was taken.
    pub captured_at: DateTime<Utc>,

    /// Stored image, relative to the store root.
    pub image_file: String,

    /// Pixel dimensions of the stored image.
    pub width: u32,
    pub height: u32,

    /// Asset this photo was imported from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AssetId>,
}

impl Photo {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Order photos by capture time, oldest first. Ties keep insertion order.
pub fn sort_by_capture_time(photos: &mut [Photo]) {
    photos.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then(a.id.cmp(&b.id)));
}
