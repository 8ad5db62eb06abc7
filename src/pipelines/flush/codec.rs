// SPDX-License-Identifier: GPL-3.0-only

//! Per-stage frame transforms
//!
//! Each stage accepts exactly one payload variant and replaces it with
//! the variant of the next stage:
//!
//! ```text
//! RawHandle ─convert─▶ CpuBuffer ─extract─▶ RawPixels ─encode─▶ EncodedBytes
//! ```
//!
//! Transforms are CPU-bound and run on the blocking pool.

use super::Stage;
use crate::config::OutputFormat;
use crate::constants::JPEG_QUALITY;
use crate::errors::StageError;
use crate::pipelines::frame::{CpuBuffer, EncodedBytes, FramePayload, RawHandle, RawPixels};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};

/// Stage transforms applied by the flush workers
pub trait FrameCodec: Send + Sync {
    /// Read a device frame back into host memory
    fn convert(&self, frame: RawHandle) -> Result<CpuBuffer, StageError>;

    /// Strip the image container down to raw pixel bytes
    fn extract(&self, buffer: CpuBuffer) -> Result<RawPixels, StageError>;

    /// Compress raw pixels into image file contents
    fn encode(&self, pixels: RawPixels) -> Result<EncodedBytes, StageError>;
}

/// Run the transform of `stage` on `payload`
///
/// A payload from the wrong stage is rejected without being touched.
pub fn apply(
    codec: &dyn FrameCodec,
    stage: Stage,
    payload: FramePayload,
) -> Result<FramePayload, StageError> {
    match (stage, payload) {
        (Stage::Convert, FramePayload::RawHandle(frame)) => {
            codec.convert(frame).map(FramePayload::CpuBuffer)
        }
        (Stage::Extract, FramePayload::CpuBuffer(buffer)) => {
            codec.extract(buffer).map(FramePayload::RawPixels)
        }
        (Stage::Encode, FramePayload::RawPixels(pixels)) => {
            codec.encode(pixels).map(FramePayload::EncodedBytes)
        }
        (stage, payload) => Err(StageError::UnexpectedPayload {
            stage,
            found: payload.kind(),
        }),
    }
}

/// Codec backed by the `image` crate
#[derive(Debug, Clone, Copy)]
pub struct ImageCodec {
    format: OutputFormat,
}

impl ImageCodec {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn rgba(width: u32, height: u32, bytes: Vec<u8>) -> Result<RgbaImage, StageError> {
        let len = bytes.len();
        RgbaImage::from_raw(width, height, bytes).ok_or(StageError::InvalidDimensions {
            width,
            height,
            len,
        })
    }

    /// Encode as PNG, alpha kept
    fn encode_png(pixels: &RawPixels) -> Result<Vec<u8>, StageError> {
        let mut buffer = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buffer).write_image(
            &pixels.bytes,
            pixels.width,
            pixels.height,
            ExtendedColorType::Rgba8,
        )?;
        Ok(buffer)
    }

    /// Encode as JPEG, alpha dropped
    fn encode_jpeg(pixels: RawPixels) -> Result<Vec<u8>, StageError> {
        let rgba = Self::rgba(pixels.width, pixels.height, pixels.bytes)?;
        let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();

        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, JPEG_QUALITY).encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(buffer)
    }
}

impl FrameCodec for ImageCodec {
    fn convert(&self, frame: RawHandle) -> Result<CpuBuffer, StageError> {
        let bytes = frame.texture.read_back()?;
        let image = Self::rgba(frame.width, frame.height, bytes)?;
        Ok(CpuBuffer { image })
    }

    fn extract(&self, buffer: CpuBuffer) -> Result<RawPixels, StageError> {
        let (width, height) = buffer.image.dimensions();
        Ok(RawPixels {
            width,
            height,
            bytes: buffer.image.into_raw(),
        })
    }

    fn encode(&self, pixels: RawPixels) -> Result<EncodedBytes, StageError> {
        let expected = pixels.width as usize * pixels.height as usize * 4;
        if pixels.bytes.len() != expected {
            return Err(StageError::InvalidDimensions {
                width: pixels.width,
                height: pixels.height,
                len: pixels.bytes.len(),
            });
        }
        let data = match self.format {
            OutputFormat::Png => Self::encode_png(&pixels)?,
            OutputFormat::Jpeg => Self::encode_jpeg(pixels)?,
        };
        Ok(EncodedBytes { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::render::{RenderSource, SyntheticRenderSource};

    fn run_all(codec: &ImageCodec) -> FramePayload {
        let source = SyntheticRenderSource::new(8, 4, 0);
        let mut payload = FramePayload::RawHandle(source.render(0).unwrap());
        for stage in [Stage::Convert, Stage::Extract, Stage::Encode] {
            payload = apply(codec, stage, payload).unwrap();
        }
        payload
    }

    #[test]
    fn test_png_chain_produces_png_signature() {
        let FramePayload::EncodedBytes(encoded) = run_all(&ImageCodec::new(OutputFormat::Png))
        else {
            panic!("expected encoded bytes");
        };
        assert_eq!(&encoded.data[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_jpeg_chain_produces_jpeg_marker() {
        let FramePayload::EncodedBytes(encoded) = run_all(&ImageCodec::new(OutputFormat::Jpeg))
        else {
            panic!("expected encoded bytes");
        };
        assert_eq!(&encoded.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_wrong_variant_is_rejected() {
        let codec = ImageCodec::new(OutputFormat::Png);
        let payload = FramePayload::EncodedBytes(EncodedBytes { data: vec![1] });
        let err = apply(&codec, Stage::Extract, payload).unwrap_err();
        assert!(matches!(
            err,
            StageError::UnexpectedPayload {
                stage: Stage::Extract,
                found: "EncodedBytes"
            }
        ));
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let codec = ImageCodec::new(OutputFormat::Png);
        let pixels = RawPixels {
            width: 4,
            height: 4,
            bytes: vec![0; 10],
        };
        assert!(matches!(
            codec.encode(pixels),
            Err(StageError::InvalidDimensions { len: 10, .. })
        ));
    }
}
