// SPDX-License-Identifier: GPL-3.0-only

//! Chunk muxing
//!
//! Once a destination directory is fully flushed its numbered frames are
//! stitched into a video by an external encoder. The recorder never waits
//! for the encoder: the process is spawned and reaped in the background.

use crate::constants::mux;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// One flushed directory ready to be stitched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxJob {
    /// Directory holding `0000.<ext>`, `0001.<ext>`, ...
    pub directory: PathBuf,
    /// Frame rate of the output video
    pub framerate: u32,
    /// Extension of the frame files
    pub extension: &'static str,
}

impl MuxJob {
    /// Path of the stitched video
    pub fn output_path(&self) -> PathBuf {
        self.directory.join(mux::OUTPUT_FILE)
    }

    /// ffmpeg image2 input pattern
    fn input_pattern(&self) -> PathBuf {
        self.directory.join(format!(
            "%0{}d.{}",
            crate::constants::FRAME_INDEX_WIDTH,
            self.extension
        ))
    }
}

/// External collaborator turning a frame directory into a video
pub trait ChunkMuxer: Send + Sync {
    /// Start stitching; must not block on the encoder
    fn stitch(&self, job: MuxJob);
}

/// Muxer running an `ffmpeg` process per chunk
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    binary: PathBuf,
}

impl FfmpegMuxer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Command-line arguments for `job`
    pub fn ffmpeg_args(job: &MuxJob) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-framerate".to_string(),
            job.framerate.to_string(),
            "-f".to_string(),
            "image2".to_string(),
            "-i".to_string(),
            job.input_pattern().display().to_string(),
            "-c:v".to_string(),
            mux::VIDEO_CODEC.to_string(),
            "-pix_fmt".to_string(),
            mux::PIXEL_FORMAT.to_string(),
            job.output_path().display().to_string(),
        ]
    }
}

impl ChunkMuxer for FfmpegMuxer {
    fn stitch(&self, job: MuxJob) {
        let args = Self::ffmpeg_args(&job);
        debug!(binary = %self.binary.display(), ?args, "Spawning muxer");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                error!(
                    binary = %self.binary.display(),
                    directory = %job.directory.display(),
                    error = %e,
                    "Failed to start muxer"
                );
                return;
            }
        };

        info!(directory = %job.directory.display(), pid = child.id(), "Muxing chunk");
        let output = job.output_path();
        let reap = move || match child.wait() {
            Ok(status) if status.success() => {
                info!(path = %output.display(), "Chunk muxed");
            }
            Ok(status) => warn!(path = %output.display(), %status, "Muxer exited with failure"),
            Err(e) => warn!(path = %output.display(), error = %e, "Failed to wait for muxer"),
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(reap);
            }
            Err(_) => {
                std::thread::spawn(reap);
            }
        }
    }
}

/// Muxer that only records the jobs it receives
#[derive(Debug, Default)]
pub struct RecordingMuxer {
    jobs: Mutex<Vec<MuxJob>>,
}

impl RecordingMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<MuxJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ChunkMuxer for RecordingMuxer {
    fn stitch(&self, job: MuxJob) {
        debug!(directory = %job.directory.display(), "Recording mux job");
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_args() {
        let job = MuxJob {
            directory: PathBuf::from("/captures/run"),
            framerate: 30,
            extension: "png",
        };
        assert_eq!(
            FfmpegMuxer::ffmpeg_args(&job),
            vec![
                "-y",
                "-framerate",
                "30",
                "-f",
                "image2",
                "-i",
                "/captures/run/%04d.png",
                "-c:v",
                "libsvtav1",
                "-pix_fmt",
                "yuva420p",
                "/captures/run/result.webm",
            ]
        );
    }

    #[test]
    fn test_missing_binary_does_not_panic() {
        let muxer = FfmpegMuxer::new("/nonexistent/ffmpeg-binary");
        muxer.stitch(MuxJob {
            directory: std::env::temp_dir(),
            framerate: 24,
            extension: "jpg",
        });
    }

    #[test]
    fn test_recording_muxer_keeps_order() {
        let muxer = RecordingMuxer::new();
        for name in ["a", "b"] {
            muxer.stitch(MuxJob {
                directory: PathBuf::from(name),
                framerate: 30,
                extension: "png",
            });
        }
        let dirs: Vec<_> = muxer.jobs().into_iter().map(|j| j.directory).collect();
        assert_eq!(dirs, vec![PathBuf::from("a"), PathBuf::from("b")]);
    }
}
