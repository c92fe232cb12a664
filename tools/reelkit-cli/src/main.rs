//! ReelKit CLI: render scene reels, join clips and preview frames.
//!
//! Usage:
//!   reelkit render <DOC> -o out.mp4     Render a scene list or listing document
//!   reelkit concat <CLIP>... -o out.mp4 Join clips into one reel
//!   reelkit frame <DOC> --index N       Render one scene to PNG
//!   reelkit check                       Check platform and engine
//!   reelkit init-config                 Write the default config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod document;

#[derive(Parser)]
#[command(
    name = "reelkit",
    about = "Short vertical video reels from scenes or clips",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the standard location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a scene reel
    Render {
        /// Scene list or listing document (JSON)
        document: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Output format: mp4 | webm | gif
        #[arg(long)]
        format: Option<String>,

        /// Output frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Abort the job after this many seconds
        #[arg(long)]
        budget_secs: Option<u64>,

        /// Print a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },

    /// Join clips into one reel
    Concat {
        /// Clip files, in order
        #[arg(required = true)]
        clips: Vec<PathBuf>,

        /// Duration of each clip in seconds, in the same order
        #[arg(short, long = "duration", required = true)]
        durations: Vec<f64>,

        /// Subtitle for each clip, in order (used by frame recapture)
        #[arg(long = "subtitle")]
        subtitles: Vec<String>,

        /// Logo drawn over every clip when frames are recaptured
        #[arg(long)]
        logo: Option<String>,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Output format: mp4 | webm | gif
        #[arg(long)]
        format: Option<String>,

        /// Abort the job after this many seconds
        #[arg(long)]
        budget_secs: Option<u64>,

        /// Print a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },

    /// Render one scene to a PNG still
    Frame {
        /// Scene list or listing document (JSON)
        document: PathBuf,

        /// Zero-based scene index
        #[arg(long, default_value = "0")]
        index: usize,

        /// Output PNG path
        #[arg(short, long, default_value = "frame.png")]
        output: PathBuf,
    },

    /// Check live capture support and engine availability
    Check,

    /// Write the default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = commands::load_config(cli.config.as_deref())?;

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    reelkit_common::logging::init_logging(&config.logging);
    tracing::debug!(config_file = ?cli.config, engine = %config.engine.primary, "Configuration loaded");

    match cli.command {
        Commands::Render {
            document,
            output,
            format,
            fps,
            budget_secs,
            json,
        } => {
            commands::render::run(
                &config,
                document,
                output,
                commands::OutputOverrides { format, fps },
                budget_secs,
                json,
            )
            .await
        }
        Commands::Concat {
            clips,
            durations,
            subtitles,
            logo,
            output,
            format,
            budget_secs,
            json,
        } => {
            commands::concat::run(
                &config,
                commands::concat::ClipArgs {
                    paths: clips,
                    durations,
                    subtitles,
                    logo,
                },
                output,
                commands::OutputOverrides { format, fps: None },
                budget_secs,
                json,
            )
            .await
        }
        Commands::Frame {
            document,
            index,
            output,
        } => commands::frame::run(&config, document, index, output).await,
        Commands::Check => commands::check::run(&config).await,
        Commands::InitConfig { force } => commands::init_config::run(cli.config.as_deref(), force),
    }
}
