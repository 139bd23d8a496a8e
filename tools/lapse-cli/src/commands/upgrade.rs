//! Re-fetch imported photos at full quality.

use std::path::PathBuf;
use std::sync::Arc;

use lapse_import_engine::{DirectoryAssetSource, ImportService, UpgradeReport};
use lapse_photo_model::PhotoStore;

use crate::context::{AppContext, TerminalProgress};

pub async fn run(ctx: AppContext, dir: PathBuf) -> anyhow::Result<()> {
    let photos = ctx.store.list()?;
    if photos.is_empty() {
        println!("The library is empty");
        return Ok(());
    }

    let service = ImportService::new(
        Arc::new(DirectoryAssetSource::new(&dir)),
        ctx.store.clone(),
        ctx.monitor.subscribe(),
        Arc::clone(&ctx.coordinator),
        ctx.config.import.clone(),
    )
    .with_progress(Arc::new(TerminalProgress));

    let report = service.start_upgrade(photos).wait().await??;
    eprintln!();
    print_report(&report);
    Ok(())
}

pub fn print_report(report: &UpgradeReport) {
    if report.outcome == lapse_import_engine::ImportOutcome::Cancelled {
        println!("Quality upgrade cancelled");
    }
    println!(
        "Upgraded {} of {} photos ({} already full size, {} failed)",
        report.upgraded, report.total, report.skipped, report.failed
    );
}
