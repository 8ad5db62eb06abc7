// SPDX-License-Identifier: GPL-3.0-only

//! Recorder-wide constants

use std::time::Duration;

/// Default capture frame rate (frames per second of recorded output)
pub const DEFAULT_CAPTURE_FRAMERATE: u32 = 30;

/// Default simulation time scale applied while capturing
pub const DEFAULT_TIMESCALE: u32 = 1;

/// Default number of captured frames that triggers a chunk flush
pub const DEFAULT_FRAME_CHUNK_SIZE: usize = 300;

/// Default worker weights per stage: capture, convert, extract, encode, persist
///
/// Convert reads back device memory and gains little from parallelism;
/// encoding is the CPU-heavy stage.
pub const DEFAULT_STAGE_WEIGHTS: [usize; 5] = [1, 1, 2, 4, 2];

/// Default fraction of the graphics memory budget that forces an early flush
pub const DEFAULT_MEMORY_FLUSH_FRACTION: f32 = 0.8;

/// Default interval for cooperative polling loops
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Time scale applied while flushing
///
/// Kept above zero: some hosts skip physics steps at a zero delta and
/// render visibly different frames once time resumes.
pub const FLUSH_TIME_SCALE: f32 = 0.000_001;

/// JPEG quality (0-100) when frames are persisted as JPEG
pub const JPEG_QUALITY: u8 = 92;

/// Zero-padded width of the frame index in file names (`0042.png`)
pub const FRAME_INDEX_WIDTH: usize = 4;

/// Muxer settings
pub mod mux {
    /// Default ffmpeg executable, resolved through PATH
    pub const FFMPEG_BINARY: &str = "ffmpeg";
    /// Video codec for stitched chunks
    pub const VIDEO_CODEC: &str = "libsvtav1";
    /// Pixel format keeping the alpha channel of captured frames
    pub const PIXEL_FORMAT: &str = "yuva420p";
    /// File name of the stitched video inside each destination directory
    pub const OUTPUT_FILE: &str = "result.webm";
}

/// Synthetic render source defaults (CLI)
pub mod synthetic {
    /// Frame width in pixels
    pub const WIDTH: u32 = 320;
    /// Frame height in pixels
    pub const HEIGHT: u32 = 180;
    /// Simulated graphics memory budget in bytes (256 MiB)
    pub const MEMORY_BUDGET: u64 = 256 * 1024 * 1024;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_cover_every_stage() {
        assert_eq!(DEFAULT_STAGE_WEIGHTS.len(), 5);
        assert!(DEFAULT_STAGE_WEIGHTS[1..].iter().all(|&w| w > 0));
    }

    #[test]
    fn test_flush_time_scale_is_never_zero() {
        assert!(FLUSH_TIME_SCALE > 0.0);
    }
}
