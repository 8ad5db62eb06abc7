// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use frame_recorder::Config;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "frame-recorder")]
#[command(about = "Capture rendered frames in chunks and stitch them into videos")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/frame-recorder/envRecorder.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log progress at info level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record frames from the synthetic render source
    Record {
        /// Frames each producer captures
        #[arg(short, long, default_value = "300", allow_negative_numbers = true)]
        frames: i64,

        /// Concurrent capture producers sharing one ingestion queue
        #[arg(short, long, default_value = "1")]
        producers: usize,

        /// Output directory (default: ~/Videos/FrameRecorder/<timestamp>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Frame width in pixels
        #[arg(long, default_value_t = frame_recorder::constants::synthetic::WIDTH)]
        width: u32,

        /// Frame height in pixels
        #[arg(long, default_value_t = frame_recorder::constants::synthetic::HEIGHT)]
        height: u32,

        /// Keep the frames, skip stitching them into a video
        #[arg(long)]
        no_mux: bool,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Loaded before the real subscriber exists so IsDebug can raise the
    // log level; load warnings go through a plain stderr subscriber
    let config_path = cli.config.unwrap_or_else(cli::default_config_path);
    let bootstrap = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let config =
        tracing::subscriber::with_default(bootstrap, || Config::load_or_default(&config_path))?;

    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=frame_recorder=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(cli::log_filter(cli.verbose, config.is_debug))
            }),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Commands::Record {
            frames,
            producers,
            output,
            width,
            height,
            no_mux,
        } => cli::record(
            config,
            cli::RecordOptions {
                frames,
                producers,
                output,
                width,
                height,
                no_mux,
            },
        ),
        Commands::Config => cli::print_config(&config),
    }
}
