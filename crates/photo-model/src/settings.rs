//! Render settings chosen by the user.

use std::fmt;
use std::str::FromStr;

use lapse_common::{RenderError, RenderResult};
use serde::{Deserialize, Serialize};

/// Lowest accepted frame rate.
pub const MIN_FPS: u32 = 1;
/// Highest accepted frame rate.
pub const MAX_FPS: u32 = 60;

/// How photos become frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// One frame per photo.
    #[default]
    Sequential,
    /// Cross-dissolve frames between adjacent photos.
    Morph,
}

/// Output resolution preset. The working resolution never exceeds it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    Medium,
    #[default]
    High,
}

impl QualityPreset {
    pub fn resolution(self) -> (u32, u32) {
        match self {
            Self::Low => (960, 540),
            Self::Medium => (1920, 1080),
            Self::High => (3840, 2160),
        }
    }
}

/// Parameters of a single render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub fps: u32,
    pub mode: RenderMode,
    pub quality: QualityPreset,

    /// Informational only; rendered files carry no audio track.
    #[serde(default)]
    pub include_audio: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            mode: RenderMode::Sequential,
            quality: QualityPreset::High,
            include_audio: false,
        }
    }
}

impl RenderSettings {
    pub fn validate(&self) -> RenderResult<()> {
        if !(MIN_FPS..=MAX_FPS).contains(&self.fps) {
            return Err(RenderError::setup(format!(
                "fps must be between {MIN_FPS} and {MAX_FPS}, got {}",
                self.fps
            )));
        }
        Ok(())
    }

    /// Synthesized steps per photo pair in morph mode, capped at `max_steps`.
    pub fn morph_steps(&self, max_steps: u32) -> u32 {
        (self.fps / 2).min(max_steps)
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sequential => "sequential",
            Self::Morph => "morph",
        })
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(Self::Sequential),
            "morph" => Ok(Self::Morph),
            other => Err(format!("unknown render mode '{other}' (use sequential or morph)")),
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

impl FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown quality '{other}' (use low, medium or high)")),
        }
    }
}
