// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for recording
//!
//! This module provides command-line functionality for:
//! - Recording frames from the synthetic render source
//! - Printing the effective configuration

use chrono::Local;
use frame_recorder::backends::render::SyntheticRenderSource;
use frame_recorder::constants::synthetic;
use frame_recorder::pipelines::muxer::RecordingMuxer;
use frame_recorder::{CaptureRequest, Config, FlushOutcome, RecordingSession};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Folder name used under the config and video directories
const APP_FOLDER: &str = "frame-recorder";

/// Config file name, shared with existing recorder setups
const CONFIG_FILE: &str = "envRecorder.json";

/// Default folder name for recordings
const DEFAULT_SAVE_FOLDER: &str = "FrameRecorder";

/// Options of the `record` command
pub struct RecordOptions {
    pub frames: i64,
    pub producers: usize,
    pub output: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub no_mux: bool,
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_FOLDER)
        .join(CONFIG_FILE)
}

/// Default log filter when RUST_LOG is unset
pub fn log_filter(verbose: bool, is_debug: bool) -> String {
    let base = if verbose { "info" } else { "warn" };
    if is_debug {
        format!("{},frame_recorder=debug", base)
    } else {
        base.to_string()
    }
}

/// Get default recording directory
fn get_default_output_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}

/// Print the effective configuration as JSON
pub fn print_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Record frames with one or more producers until every chunk is flushed
pub fn record(config: Config, options: RecordOptions) -> Result<(), Box<dyn std::error::Error>> {
    if options.producers == 0 {
        return Err("At least one producer is required".into());
    }
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(record_async(config, options))
}

async fn record_async(
    config: Config,
    options: RecordOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    // Ctrl+C cancels producers and any running flush
    let cancel = CancellationToken::new();
    let cancel_handler = cancel.clone();
    ctrlc::set_handler(move || {
        cancel_handler.cancel();
    })?;

    let framerate = config.capture_target_framerate;
    let chunk_size = config.frame_chunk_size;
    let skipped_mux = Arc::new(RecordingMuxer::new());
    let mut builder = RecordingSession::builder(config)
        .with_source(Arc::new(SyntheticRenderSource::new(
            options.width,
            options.height,
            synthetic::MEMORY_BUDGET,
        )))
        .with_cancellation(cancel.clone());
    if options.no_mux {
        builder = builder.with_muxer(skipped_mux.clone());
    }
    let session = builder.build()?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let base = options
        .output
        .unwrap_or_else(get_default_output_dir)
        .join(&timestamp);

    println!(
        "Recording {} frame(s) x {} producer(s) at {}fps, chunks of {}",
        options.frames, options.producers, framerate, chunk_size
    );
    println!("Output: {}", base.display());
    println!("(press Ctrl+C to stop early)");

    let start = Instant::now();
    let mut handles = Vec::with_capacity(options.producers);
    for index in 0..options.producers {
        let output_dir = if options.producers == 1 {
            base.clone()
        } else {
            base.join(format!("take_{:02}", index))
        };
        handles.push(session.start_capture(CaptureRequest::new(options.frames, output_dir))?);
    }

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Capture task failed");
        }
    }
    session.wait_until_idle().await;

    let snapshot = session.counters();
    let history = session.flush_history();
    let cancelled = session.is_cancelled();
    session.shutdown().await;

    println!();
    for (index, report) in history.iter().enumerate() {
        println!(
            "Flush {}: {:?}, {} frames in {:.2}s",
            index + 1,
            report.outcome,
            report.snapshot,
            report.elapsed.as_secs_f64()
        );
    }
    println!(
        "Persisted {}/{} frames ({} written, {} skipped, {} failed) in {:.2}s",
        snapshot.persisted,
        snapshot.target,
        snapshot.written(),
        snapshot.skipped,
        snapshot.failed,
        start.elapsed().as_secs_f64()
    );

    if options.no_mux {
        for job in skipped_mux.jobs() {
            println!("Frames kept: {}", job.directory.display());
        }
    }

    let interrupted = history
        .iter()
        .any(|report| report.outcome == FlushOutcome::Cancelled);
    if cancelled || interrupted {
        println!("Recording cancelled before every frame was persisted");
    }

    Ok(())
}
