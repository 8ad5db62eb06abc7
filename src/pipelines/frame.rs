// SPDX-License-Identifier: GPL-3.0-only

//! Frame items moving through the flush pipeline
//!
//! A frame starts as a handle to device memory and is replaced, stage by
//! stage, by a CPU image, raw pixel bytes and finally encoded bytes.
//! Each variant names the stage that consumes it, so a transform only
//! ever matches the one variant it accepts.

use crate::backends::render::DeviceTexture;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Handle to a rendered frame still resident in device memory
#[derive(Clone)]
pub struct RawHandle {
    pub width: u32,
    pub height: u32,
    pub texture: Arc<dyn DeviceTexture>,
}

impl std::fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RawHandle({}x{}, {} bytes)",
            self.width,
            self.height,
            self.texture.byte_size()
        )
    }
}

/// Frame copied into host memory as an RGBA image
#[derive(Debug, Clone)]
pub struct CpuBuffer {
    pub image: RgbaImage,
}

/// Bare RGBA8 pixel bytes, row-major
#[derive(Debug, Clone)]
pub struct RawPixels {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Compressed image file contents
#[derive(Debug, Clone)]
pub struct EncodedBytes {
    pub data: Vec<u8>,
}

/// Stage-tagged frame payload
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Input of the convert stage
    RawHandle(RawHandle),
    /// Input of the extract stage
    CpuBuffer(CpuBuffer),
    /// Input of the encode stage
    RawPixels(RawPixels),
    /// Input of the persist stage
    EncodedBytes(EncodedBytes),
}

impl FramePayload {
    /// Variant name, for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            FramePayload::RawHandle(_) => "RawHandle",
            FramePayload::CpuBuffer(_) => "CpuBuffer",
            FramePayload::RawPixels(_) => "RawPixels",
            FramePayload::EncodedBytes(_) => "EncodedBytes",
        }
    }
}

/// One captured frame and the file it ends up in
///
/// `payload == None` marks a frame to skip. It still travels through
/// every stage so completion counts stay exact.
#[derive(Debug)]
pub struct FrameItem {
    pub payload: Option<FramePayload>,
    pub destination: PathBuf,
    /// Set when a stage transform failed and dropped the payload
    pub failed: bool,
}

impl FrameItem {
    pub fn new(payload: Option<FramePayload>, destination: PathBuf) -> Self {
        Self {
            payload,
            destination,
            failed: false,
        }
    }

    /// Drop the payload after a failed transform, keeping the slot
    pub fn into_failed(self) -> Self {
        Self {
            payload: None,
            failed: true,
            ..self
        }
    }

    /// A frame the render source could not produce
    pub fn skipped(destination: PathBuf) -> Self {
        Self::new(None, destination)
    }

    pub fn is_skipped(&self) -> bool {
        self.payload.is_none()
    }
}

/// File path of frame `index` inside `output_dir`
///
/// Indices are zero-padded so ffmpeg's `%04d` pattern picks frames up
/// in capture order.
pub fn frame_destination(output_dir: &Path, index: u64, extension: &str) -> PathBuf {
    output_dir.join(format!(
        "{:0width$}.{}",
        index,
        extension,
        width = crate::constants::FRAME_INDEX_WIDTH
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_destination_is_zero_padded() {
        let path = frame_destination(Path::new("/tmp/chunk"), 7, "png");
        assert_eq!(path, PathBuf::from("/tmp/chunk/0007.png"));
    }

    #[test]
    fn test_frame_destination_grows_past_padding() {
        let path = frame_destination(Path::new("out"), 12345, "jpg");
        assert_eq!(path, PathBuf::from("out/12345.jpg"));
    }

    #[test]
    fn test_skipped_item_has_no_payload() {
        let item = FrameItem::skipped(PathBuf::from("a.png"));
        assert!(item.is_skipped());
        assert!(!item.failed);
    }

    #[test]
    fn test_failed_item_keeps_destination() {
        let item = FrameItem::new(
            Some(FramePayload::EncodedBytes(EncodedBytes { data: vec![1, 2] })),
            PathBuf::from("b.png"),
        )
        .into_failed();
        assert!(item.is_skipped());
        assert!(item.failed);
        assert_eq!(item.destination, PathBuf::from("b.png"));
    }
}
