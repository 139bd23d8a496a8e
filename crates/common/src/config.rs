//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory for the photo library and rendered timelapses.
    pub data_dir: PathBuf,

    /// Memory pressure thresholds and sampling.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Bulk import tuning.
    #[serde(default)]
    pub import: ImportConfig,

    /// Render engine tuning.
    #[serde(default)]
    pub render: RenderConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Thresholds used to classify resident memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Resident size above which the level becomes `Warning`.
    pub warning_mb: u64,

    /// Resident size above which the level becomes `Critical`.
    pub critical_mb: u64,

    /// Sampling interval for the background monitor.
    pub sample_interval_ms: u64,
}

/// Batch, concurrency, retry and pacing parameters for imports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Smallest batch the scheduler will form.
    pub min_batch_size: usize,

    /// Largest batch the scheduler will form (used under normal memory).
    pub max_batch_size: usize,

    /// Fetch concurrency under normal memory.
    pub max_concurrency: usize,

    /// Failures allowed per asset before it is dropped.
    pub retry_attempts: u32,

    /// Fixed delay before each retry during the drain pass.
    pub retry_delay_ms: u64,

    /// Upper bound for a single fetch.
    pub fetch_timeout_ms: u64,

    /// Width requested for the fast first-pass decode.
    pub fast_target_width: u32,

    /// Width requested by the quality upgrade pass.
    pub upgrade_target_width: u32,

    /// Consecutive successes after which a pacing delay is inserted.
    pub delay_every_successes: u32,

    /// Pause after every batch.
    pub batch_pause_ms: u64,

    /// Memory-proportional pacing delays.
    pub delays: DelayTable,
}

/// Pacing delays per memory level, for first imports and quality upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayTable {
    pub normal_ms: u64,
    pub warning_ms: u64,
    pub critical_ms: u64,
    pub upgrade_normal_ms: u64,
    pub upgrade_warning_ms: u64,
    pub upgrade_critical_ms: u64,
}

/// Render engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Longest side of the working resolution, bounding per-frame memory.
    pub max_dimension: u32,

    /// Upper bound on synthesized frames per image pair in morph mode.
    pub max_morph_steps: u32,

    /// Target video bitrate.
    pub bitrate_bps: u64,

    /// Maximum distance between keyframes.
    pub keyframe_interval: u32,

    /// Frames the encoder may have queued before it reports not-ready.
    pub encoder_queue_depth: usize,

    /// Sleep between write-readiness polls.
    pub ready_poll_ms: u64,

    /// Give up when the encoder stays unready this long.
    pub ready_timeout_ms: u64,

    /// Frame buffers kept for reuse by the buffer pool.
    pub pool_capacity: usize,

    /// Subdirectory of the data dir receiving rendered files.
    pub output_dir_name: String,

    /// Container extension of rendered files.
    pub container_ext: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "lapse=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            memory: MemoryConfig::default(),
            import: ImportConfig::default(),
            render: RenderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            warning_mb: 300,
            critical_mb: 500,
            sample_interval_ms: 1000,
        }
    }
}

impl MemoryConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            min_batch_size: 1,
            max_batch_size: 5,
            max_concurrency: 3,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            fetch_timeout_ms: 30_000,
            fast_target_width: 256,
            upgrade_target_width: 4032,
            delay_every_successes: 1,
            batch_pause_ms: 500,
            delays: DelayTable::default(),
        }
    }
}

impl ImportConfig {
    /// Same limits as the default, with every pacing delay removed.
    pub fn without_pacing() -> Self {
        Self {
            retry_delay_ms: 0,
            batch_pause_ms: 0,
            delays: DelayTable::zero(),
            ..Self::default()
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms.max(1))
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

impl Default for DelayTable {
    fn default() -> Self {
        Self {
            normal_ms: 100,
            warning_ms: 500,
            critical_ms: 1000,
            upgrade_normal_ms: 500,
            upgrade_warning_ms: 1000,
            upgrade_critical_ms: 2000,
        }
    }
}

impl DelayTable {
    pub fn zero() -> Self {
        Self {
            normal_ms: 0,
            warning_ms: 0,
            critical_ms: 0,
            upgrade_normal_ms: 0,
            upgrade_warning_ms: 0,
            upgrade_critical_ms: 0,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1280,
            max_morph_steps: 8,
            bitrate_bps: 8_000_000,
            keyframe_interval: 30,
            encoder_queue_depth: 4,
            ready_poll_ms: 100,
            ready_timeout_ms: 30_000,
            pool_capacity: 4,
            output_dir_name: "Timelapses".to_string(),
            container_ext: "mp4".to_string(),
        }
    }
}

impl RenderConfig {
    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms.max(1))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Directory holding the photo library index and stored images.
    pub fn library_dir(&self) -> PathBuf {
        self.data_dir.join("library")
    }

    /// Directory receiving rendered timelapses.
    pub fn timelapse_dir(&self) -> PathBuf {
        self.data_dir.join(&self.render.output_dir_name)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("lapse").join("config.json")
}

/// Default data directory.
fn default_data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("lapse")
}
