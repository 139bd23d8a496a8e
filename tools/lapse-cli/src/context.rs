//! Shared state for commands that touch the library.

use std::io::Write;
use std::sync::Arc;

use lapse_common::{
    AppConfig, CancellationCoordinator, MemoryPressureMonitor, OperationKind, ProgressSink,
};
use lapse_photo_model::FilePhotoStore;

pub struct AppContext {
    pub config: AppConfig,
    pub store: Arc<FilePhotoStore>,
    pub monitor: MemoryPressureMonitor,
    pub coordinator: Arc<CancellationCoordinator>,
}

impl AppContext {
    /// Open the library and start the memory monitor. Ctrl+C cancels running work.
    pub fn open(config: AppConfig) -> anyhow::Result<Self> {
        let library = config.library_dir();
        let store = FilePhotoStore::open(&library)
            .map_err(|e| anyhow::anyhow!("Failed to open library at {}: {e}", library.display()))?;

        let monitor = MemoryPressureMonitor::for_process(&config.memory);
        monitor.start(config.memory.sample_interval());

        let coordinator = Arc::new(CancellationCoordinator::new());
        cancel_on_ctrl_c(Arc::clone(&coordinator));

        Ok(Self {
            config,
            store: Arc::new(store),
            monitor,
            coordinator,
        })
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.monitor.stop();
    }
}

fn cancel_on_ctrl_c(coordinator: Arc<CancellationCoordinator>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!();
        let cancelled = [
            OperationKind::Import,
            OperationKind::Upgrade,
            OperationKind::Render,
        ]
        .into_iter()
        .map(|kind| coordinator.cancel_kind(kind))
        .sum::<usize>();
        tracing::info!(cancelled, "Interrupted");
    });
}

/// Single-line progress display on stderr.
#[derive(Debug, Default)]
pub struct TerminalProgress;

impl ProgressSink for TerminalProgress {
    fn update(&self, status: &str, fraction: f64) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r\x1b[2K{status} [{percent:>3}%]");
        if fraction >= 1.0 {
            let _ = writeln!(stderr);
        }
        let _ = stderr.flush();
    }
}
