//! Import images from a directory.

use std::path::PathBuf;
use std::sync::Arc;

use lapse_import_engine::{DirectoryAssetSource, ImportService};

use crate::commands::upgrade;
use crate::context::{AppContext, TerminalProgress};

pub async fn run(ctx: AppContext, dir: PathBuf, upgrade_after: bool) -> anyhow::Result<()> {
    let source = Arc::new(DirectoryAssetSource::new(&dir));
    let assets = source.scan()?;
    if assets.is_empty() {
        println!("No images found in {}", dir.display());
        return Ok(());
    }

    let service = ImportService::new(
        source,
        ctx.store.clone(),
        ctx.monitor.subscribe(),
        Arc::clone(&ctx.coordinator),
        ctx.config.import.clone(),
    )
    .with_progress(Arc::new(TerminalProgress));

    let report = service.start_import(assets).wait().await??;
    eprintln!();

    println!(
        "Imported {} of {} assets ({} skipped, {} retried)",
        report.photos.len(),
        report.total,
        report.skipped,
        report.retries.len()
    );
    if let Some(warning) = &report.warning {
        println!("Warning: {warning}");
    }
    if report.is_cancelled() {
        println!("Import cancelled");
        return Ok(());
    }

    if upgrade_after && !report.photos.is_empty() {
        let upgraded = service.start_upgrade(report.photos).wait().await??;
        eprintln!();
        upgrade::print_report(&upgraded);
    }
    Ok(())
}
