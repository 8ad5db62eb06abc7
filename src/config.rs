// SPDX-License-Identifier: GPL-3.0-only

//! Recorder configuration
//!
//! Read once when a session is built. Keys are PascalCase so existing
//! `envRecorder.json` files keep working; every key is optional.

use crate::constants::{
    DEFAULT_CAPTURE_FRAMERATE, DEFAULT_FRAME_CHUNK_SIZE, DEFAULT_MEMORY_FLUSH_FRACTION,
    DEFAULT_POLL_INTERVAL, DEFAULT_STAGE_WEIGHTS, DEFAULT_TIMESCALE, mux,
};
use crate::errors::ConfigError;
use crate::pipelines::flush::{Stage, StageWeights};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// How the coordinator moves from one stage to the next
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum TransitionMode {
    /// Next stage starts only after the current one produced every frame
    #[serde(alias = "Synchronous")]
    SyncFull,
    /// Every stage starts at once
    #[serde(alias = "Asynchronous")]
    AsyncFull,
    /// Next stage starts once the current one produced its first frame
    #[default]
    #[serde(alias = "SemiAsynchronous")]
    AsyncSemi,
}

/// Image format written by the persist stage
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum OutputFormat {
    /// Lossless, keeps alpha
    #[default]
    Png,
    /// Lossy, alpha dropped
    Jpeg,
}

impl OutputFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Frame rate of the recorded output
    pub capture_target_framerate: u32,
    /// Simulation speed-up while capturing
    pub timescale: u32,
    /// Enables per-stage timing logs
    pub is_debug: bool,
    /// Frames per chunk; also the capacity of one ingestion queue
    pub frame_chunk_size: usize,
    /// Initial worker weight per stage (capture, convert, extract, encode, persist)
    pub stage_weights: [usize; 5],
    /// Stage transition policy
    pub transition_mode: TransitionMode,
    /// Hand idle weight to later stages once a stage finishes
    pub enable_weight_redistribution: bool,
    /// Fraction of the graphics memory budget that forces an early flush
    pub memory_flush_fraction: f32,
    /// Interval of cooperative polling loops, in milliseconds
    pub poll_interval_ms: u64,
    /// Image format of persisted frames
    pub output_format: OutputFormat,
    /// ffmpeg executable used to stitch chunks
    pub ffmpeg_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_target_framerate: DEFAULT_CAPTURE_FRAMERATE,
            timescale: DEFAULT_TIMESCALE,
            is_debug: false,
            frame_chunk_size: DEFAULT_FRAME_CHUNK_SIZE,
            stage_weights: DEFAULT_STAGE_WEIGHTS,
            transition_mode: TransitionMode::default(),
            enable_weight_redistribution: true,
            memory_flush_fraction: DEFAULT_MEMORY_FLUSH_FRACTION,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            output_format: OutputFormat::default(),
            ffmpeg_path: PathBuf::from(mux::FFMPEG_BINARY),
        }
    }
}

impl Config {
    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded recorder config");
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist
    ///
    /// A file that exists but fails to parse or validate is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture_target_framerate == 0 {
            return Err(invalid("CaptureTargetFramerate", "must be at least 1"));
        }
        if self.timescale == 0 {
            return Err(invalid("Timescale", "must be at least 1"));
        }
        if self.frame_chunk_size == 0 {
            return Err(invalid("FrameChunkSize", "must be at least 1"));
        }
        // A downstream stage without workers never drains its input.
        if let Some(stage) = Stage::DOWNSTREAM
            .iter()
            .find(|stage| self.stage_weights[stage.index()] == 0)
        {
            return Err(invalid(
                "StageWeights",
                format!("{} stage needs at least one worker", stage),
            ));
        }
        if !(self.memory_flush_fraction > 0.0 && self.memory_flush_fraction <= 1.0) {
            return Err(invalid("MemoryFlushFraction", "must be in (0, 1]"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("PollIntervalMs", "must be at least 1"));
        }
        Ok(())
    }

    /// Initial stage weight vector for a flush cycle
    pub fn initial_weights(&self) -> StageWeights {
        StageWeights::new(self.stage_weights)
    }

    /// Poll interval of cooperative waits
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Host frame rate while capturing (output rate times simulation speed-up)
    pub fn scaled_framerate(&self) -> u32 {
        self.capture_target_framerate.saturating_mul(self.timescale)
    }

    /// Interval between two captured frames on the host
    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.scaled_framerate().max(1)))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
