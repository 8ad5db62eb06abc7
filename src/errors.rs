// SPDX-License-Identifier: MPL-2.0

//! Error types for the frame recorder
//!
//! Only configuration and capture-request errors ever reach a caller.
//! Failures inside a flush cycle are logged and folded into the flush
//! counters instead of being returned.

use crate::pipelines::flush::Stage;
use std::fmt;
use std::path::PathBuf;

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Main recorder error type
#[derive(Debug, Clone)]
pub enum RecorderError {
    /// Configuration errors
    Config(ConfigError),
    /// Capture request errors
    Capture(CaptureError),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Config file could not be read
    Read { path: PathBuf, reason: String },
    /// Config file is not valid JSON for the recorder
    Parse(String),
    /// A field holds a value the pipeline cannot run with
    Invalid { field: &'static str, reason: String },
}

/// Capture request errors, raised synchronously by `start_capture`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Target frame count below zero
    NegativeTarget(i64),
    /// Output directory missing or empty
    EmptyDestination,
    /// Session already cancelled, no new producers accepted
    SessionClosed,
}

/// Stage transform errors
///
/// These never escape a flush cycle; the affected frame is skipped
/// and still counted toward completion.
#[derive(Debug, Clone)]
pub enum StageError {
    /// Payload variant does not belong to the stage's input
    UnexpectedPayload { stage: Stage, found: &'static str },
    /// Device readback failed
    Readback(String),
    /// Pixel buffer does not match its declared dimensions
    InvalidDimensions { width: u32, height: u32, len: usize },
    /// Image encoding failed
    Encoding(String),
    /// Blocking transform task failed to complete
    Task(String),
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::Config(e) => write!(f, "Configuration error: {}", e),
            RecorderError::Capture(e) => write!(f, "Capture error: {}", e),
            RecorderError::Storage(msg) => write!(f, "Storage error: {}", msg),
            RecorderError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, reason } => {
                write!(f, "Failed to read {}: {}", path.display(), reason)
            }
            ConfigError::Parse(msg) => write!(f, "Invalid config file: {}", msg),
            ConfigError::Invalid { field, reason } => write!(f, "{}: {}", field, reason),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NegativeTarget(n) => write!(f, "Target frame count {} is negative", n),
            CaptureError::EmptyDestination => write!(f, "No output directory given"),
            CaptureError::SessionClosed => write!(f, "Session is shutting down"),
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::UnexpectedPayload { stage, found } => {
                write!(f, "{} stage received a {} payload", stage, found)
            }
            StageError::Readback(msg) => write!(f, "Readback failed: {}", msg),
            StageError::InvalidDimensions { width, height, len } => write!(
                f,
                "{} bytes do not describe a {}x{} RGBA image",
                len, width, height
            ),
            StageError::Encoding(msg) => write!(f, "Encoding failed: {}", msg),
            StageError::Task(msg) => write!(f, "Transform task failed: {}", msg),
        }
    }
}

impl std::error::Error for RecorderError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for CaptureError {}
impl std::error::Error for StageError {}

impl From<ConfigError> for RecorderError {
    fn from(err: ConfigError) -> Self {
        RecorderError::Config(err)
    }
}

impl From<CaptureError> for RecorderError {
    fn from(err: CaptureError) -> Self {
        RecorderError::Capture(err)
    }
}

impl From<String> for RecorderError {
    fn from(msg: String) -> Self {
        RecorderError::Other(msg)
    }
}

impl From<&str> for RecorderError {
    fn from(msg: &str) -> Self {
        RecorderError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for RecorderError {
    fn from(err: std::io::Error) -> Self {
        RecorderError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<image::ImageError> for StageError {
    fn from(err: image::ImageError) -> Self {
        StageError::Encoding(err.to_string())
    }
}
