//! Render the library into a timelapse.

use std::path::PathBuf;
use std::sync::Arc;

use lapse_photo_model::{PhotoStore, QualityPreset, RenderMode, RenderSettings};
use lapse_render_engine::{
    is_ffmpeg_on_path, FfmpegEncoderFactory, RenderOutcome, RenderService, TimelapseRenderEngine,
};

use crate::context::{AppContext, TerminalProgress};

pub async fn run(
    ctx: AppContext,
    fps: u32,
    mode: RenderMode,
    quality: QualityPreset,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    if !is_ffmpeg_on_path() {
        anyhow::bail!("ffmpeg is required for rendering, but was not found on PATH");
    }

    let photos = ctx.store.list()?;
    let settings = RenderSettings {
        fps,
        mode,
        quality,
        ..RenderSettings::default()
    };

    let engine = TimelapseRenderEngine::new(
        ctx.store.clone(),
        Arc::new(FfmpegEncoderFactory),
        ctx.config.render.clone(),
    )
    .with_memory(ctx.monitor.subscribe())
    .with_progress(Arc::new(TerminalProgress));
    let service = RenderService::new(
        Arc::new(engine),
        Arc::clone(&ctx.coordinator),
        ctx.config.timelapse_dir(),
    );

    let handle = match output {
        Some(path) => service.start_render_to(photos, settings, path),
        None => service.start_render(photos, settings),
    };

    match handle.wait().await? {
        RenderOutcome::Completed(out) => {
            println!("Timelapse saved to: {}", out.path.display());
            println!(
                "  {}x{}, {} frames, {:.1}s",
                out.width, out.height, out.frames_written, out.duration_secs
            );
            if out.frames_skipped > 0 {
                println!("  {} frame(s) skipped", out.frames_skipped);
            }
            Ok(())
        }
        RenderOutcome::Cancelled { .. } => {
            eprintln!();
            println!("Timelapse generation cancelled");
            Ok(())
        }
        RenderOutcome::Failed(error) => {
            eprintln!();
            Err(error.into())
        }
    }
}
