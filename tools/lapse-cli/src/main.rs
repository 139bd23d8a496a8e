//! Lapse CLI - import photos and turn them into timelapses.
//!
//! Usage:
//!   lapse import <DIR>        Import images from a directory
//!   lapse upgrade             Re-fetch imported photos at full quality
//!   lapse render [OPTIONS]    Render the library into a timelapse video
//!   lapse list                List imported photos
//!   lapse delete <ID>         Delete a photo from the library
//!   lapse check               Check ffmpeg and data directories

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lapse_photo_model::{PhotoId, QualityPreset, RenderMode};

mod commands;
mod context;

#[derive(Parser)]
#[command(
    name = "lapse",
    about = "Resource-adaptive photo import and timelapse rendering",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Data directory holding the photo library and rendered timelapses
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import images from a directory into the library
    Import {
        /// Directory to scan (recursively)
        dir: PathBuf,

        /// Skip the full-quality pass after importing
        #[arg(long)]
        no_upgrade: bool,
    },

    /// Re-fetch every imported photo at full quality
    Upgrade {
        /// Directory the photos were imported from
        dir: PathBuf,
    },

    /// Render the library into a timelapse video
    Render {
        /// Frames per second (1-60)
        #[arg(long, default_value = "30")]
        fps: u32,

        /// sequential|morph
        #[arg(long, default_value = "sequential")]
        mode: RenderMode,

        /// low|medium|high
        #[arg(long, default_value = "high")]
        quality: QualityPreset,

        /// Output file (default: a timestamped file in the Timelapses directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List imported photos
    List {
        /// Print the photo records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a photo from the library
    Delete {
        /// Photo ID as shown by `lapse list`
        id: PhotoId,
    },

    /// Check system capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = lapse_common::AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(library) = cli.library {
        config.data_dir = library;
    }
    lapse_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Import { dir, no_upgrade } => {
            commands::import::run(context::AppContext::open(config)?, dir, !no_upgrade).await
        }
        Commands::Upgrade { dir } => {
            commands::upgrade::run(context::AppContext::open(config)?, dir).await
        }
        Commands::Render {
            fps,
            mode,
            quality,
            output,
        } => {
            commands::render::run(
                context::AppContext::open(config)?,
                fps,
                mode,
                quality,
                output,
            )
            .await
        }
        Commands::List { json } => commands::list::run(context::AppContext::open(config)?, json),
        Commands::Delete { id } => commands::delete::run(context::AppContext::open(config)?, id),
        Commands::Check => commands::check::run(&config),
    }
}
