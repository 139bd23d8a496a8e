//! Check system capabilities.

use lapse_common::AppConfig;
use lapse_render_engine::is_ffmpeg_on_path;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Lapse System Check");
    println!("{}", "=".repeat(50));

    let ffmpeg = is_ffmpeg_on_path();
    if ffmpeg {
        println!("[OK] ffmpeg found on PATH");
    } else {
        println!("[FAIL] ffmpeg not found on PATH (required for rendering)");
    }

    for (label, dir) in [
        ("Library", config.library_dir()),
        ("Timelapses", config.timelapse_dir()),
    ] {
        let status = if dir.is_dir() { "OK" } else { "NEW" };
        println!("[{status}] {label}: {}", dir.display());
    }

    println!(
        "[OK] Memory thresholds: warning > {} MB, critical > {} MB",
        config.memory.warning_mb, config.memory.critical_mb
    );

    println!();
    if ffmpeg {
        println!("All required capabilities are available. Lapse is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }
    Ok(())
}
