//! Memory pressure monitoring.
//!
//! The monitor samples the resident size of the process, classifies it into
//! a [`MemoryLevel`] and publishes the level through a `watch` channel. Only
//! the monitor writes the level; schedulers and renderers hold receivers.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MemoryConfig;

const MB: u64 = 1024 * 1024;

/// Coarse classification of resident memory.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLevel {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl MemoryLevel {
    /// User-facing description.
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Warning => "High Memory Usage",
            Self::Critical => "Critical Memory Usage",
        }
    }
}

impl fmt::Display for MemoryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Resident-size thresholds. A sample strictly above a threshold escalates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryThresholds {
    pub warning_bytes: u64,
    pub critical_bytes: u64,
}

impl MemoryThresholds {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            warning_bytes: config.warning_mb.saturating_mul(MB),
            critical_bytes: config.critical_mb.saturating_mul(MB),
        }
    }

    pub fn classify(&self, resident_bytes: u64) -> MemoryLevel {
        if resident_bytes > self.critical_bytes {
            MemoryLevel::Critical
        } else if resident_bytes > self.warning_bytes {
            MemoryLevel::Warning
        } else {
            MemoryLevel::Normal
        }
    }
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

/// Source of resident-memory readings.
pub trait MemoryProbe: Send + Sync {
    /// Current resident size in bytes, or `None` if the query failed.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads the resident set size of the current process from the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryProbe;

#[cfg(target_os = "linux")]
impl MemoryProbe for ProcessMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        // SAFETY: sysconf has no preconditions and only reads system configuration.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page_size <= 0 {
            return None;
        }
        Some(resident_pages.saturating_mul(page_size as u64))
    }
}

#[cfg(not(target_os = "linux"))]
impl MemoryProbe for ProcessMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}

/// Periodically classifies resident memory and publishes level changes.
pub struct MemoryPressureMonitor {
    probe: Arc<dyn MemoryProbe>,
    thresholds: MemoryThresholds,
    level_tx: Arc<watch::Sender<MemoryLevel>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryPressureMonitor {
    pub fn new(probe: Arc<dyn MemoryProbe>, thresholds: MemoryThresholds) -> Self {
        let (level_tx, _) = watch::channel(MemoryLevel::Normal);
        Self {
            probe,
            thresholds,
            level_tx: Arc::new(level_tx),
            task: Mutex::new(None),
        }
    }

    /// Monitor for the current process using configured thresholds.
    pub fn for_process(config: &MemoryConfig) -> Self {
        Self::new(
            Arc::new(ProcessMemoryProbe),
            MemoryThresholds::from_config(config),
        )
    }

    /// Classify the current resident size without publishing it.
    ///
    /// A failed OS query reads as `Normal`.
    pub fn sample(&self) -> MemoryLevel {
        sample_level(self.probe.as_ref(), &self.thresholds)
    }

    /// Take one sample and publish it if the level changed.
    ///
    /// Returns the new level on a change, `None` when it stayed in the same bucket.
    pub fn poll_once(&self) -> Option<MemoryLevel> {
        publish_sample(self.probe.as_ref(), &self.thresholds, &self.level_tx)
    }

    /// Start sampling every `interval`. Calling `start` while running is a no-op.
    pub fn start(&self, interval: Duration) {
        let mut task = self.lock_task();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let probe = Arc::clone(&self.probe);
        let thresholds = self.thresholds;
        let level_tx = Arc::clone(&self.level_tx);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                publish_sample(probe.as_ref(), &thresholds, &level_tx);
            }
        }));
        tracing::debug!(interval_ms = interval.as_millis() as u64, "Memory monitor started");
    }

    /// Stop sampling. Safe to call any number of times.
    pub fn stop(&self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
            tracing::debug!("Memory monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_task()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Last published level.
    pub fn current(&self) -> MemoryLevel {
        *self.level_tx.borrow()
    }

    /// Receiver that observes every published level change.
    pub fn subscribe(&self) -> watch::Receiver<MemoryLevel> {
        self.level_tx.subscribe()
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MemoryPressureMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sample_level(probe: &dyn MemoryProbe, thresholds: &MemoryThresholds) -> MemoryLevel {
    match probe.resident_bytes() {
        Some(bytes) => thresholds.classify(bytes),
        None => MemoryLevel::Normal,
    }
}

fn publish_sample(
    probe: &dyn MemoryProbe,
    thresholds: &MemoryThresholds,
    level_tx: &watch::Sender<MemoryLevel>,
) -> Option<MemoryLevel> {
    let level = sample_level(probe, thresholds);
    let previous = *level_tx.borrow();
    let changed = level_tx.send_if_modified(|current| {
        if *current == level {
            false
        } else {
            *current = level;
            true
        }
    });

    if !changed {
        return None;
    }
    if level > previous {
        tracing::warn!(from = %previous, to = %level, "Memory pressure increased");
    } else {
        tracing::info!(from = %previous, to = %level, "Memory pressure eased");
    }
    Some(level)
}
