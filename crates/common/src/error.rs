//! Error types shared across Lapse crates.

use std::path::PathBuf;

/// Top-level error type for Lapse operations.
#[derive(Debug, thiserror::Error)]
pub enum LapseError {
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Photo store error: {message}")]
    Store { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using LapseError.
pub type LapseResult<T> = Result<T, LapseError>;

impl LapseError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}

/// Failure of a single asset fetch.
///
/// None of these abort an import as a whole; they feed the retry queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("Failed to load image: {message}")]
    LoadFailed { message: String },

    #[error("Image import was cancelled")]
    Cancelled,

    #[error("Image import timed out")]
    Timeout,
}

impl ImportError {
    pub fn load_failed(msg: impl Into<String>) -> Self {
        Self::LoadFailed {
            message: msg.into(),
        }
    }

    /// Whether the failure should be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Errors raised while rendering a timelapse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to setup video export: {message}")]
    SetupFailed { message: String },

    #[error("Failed to render frame: {message}")]
    RenderFailed { message: String },

    #[error("Timelapse generation cancelled")]
    Cancelled,

    #[error("No photos available for timelapse")]
    NoPhotos,

    #[error("Failed to export timelapse: {message}")]
    ExportFailed { message: String },

    #[error("Not enough memory to process images: {message}")]
    MemoryError { message: String },
}

/// Result type alias for the render engine.
pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::SetupFailed {
            message: msg.into(),
        }
    }

    pub fn frame(msg: impl Into<String>) -> Self {
        Self::RenderFailed {
            message: msg.into(),
        }
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::ExportFailed {
            message: msg.into(),
        }
    }

    pub fn memory(msg: impl Into<String>) -> Self {
        Self::MemoryError {
            message: msg.into(),
        }
    }

    /// Whether this error ends the whole render call.
    ///
    /// `RenderFailed` is per-frame: the frame is skipped and rendering goes on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RenderFailed { .. })
    }
}
