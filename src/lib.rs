// SPDX-License-Identifier: MPL-2.0

//! Frame Recorder - chunked capture of rendered frames to disk
//!
//! Frames are captured from a live render source at a fixed cadence and
//! queued in device memory. Whenever a chunk fills up, or capture ends,
//! a flush cycle converts, encodes and writes the queued frames through
//! a weighted, pipelined worker pool, and each finished directory is
//! stitched into a video.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Render source and runtime settings collaborators
//! - [`pipelines`]: Capture, flush and session pipelines
//! - [`config`]: Recorder configuration handling
//! - [`errors`]: Error types
//!
//! # Example
//!
//! ```ignore
//! let session = RecordingSession::builder(Config::default()).build()?;
//! session.start_capture(CaptureRequest::new(300, "/tmp/capture"))?;
//! session.wait_until_idle().await;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod pipelines;

// Re-export commonly used types
pub use config::{Config, OutputFormat, TransitionMode};
pub use errors::{RecorderError, RecorderResult};
pub use pipelines::{CaptureRequest, FlushOutcome, FlushReport, RecordingSession, SessionSnapshot};
