// SPDX-License-Identifier: GPL-3.0-only

//! Render collaborator
//!
//! The recorder never renders anything itself. A [`RenderSource`] hands
//! out frames that still live in device memory and reports how much of
//! the device budget they occupy; the convert stage later reads each
//! frame back to the host.

use crate::errors::StageError;
use crate::pipelines::frame::RawHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Device-resident frame storage
pub trait DeviceTexture: Send + Sync {
    /// Copy the texture into host memory as tightly packed RGBA8
    fn read_back(&self) -> Result<Vec<u8>, StageError>;

    /// Device memory held by this texture
    fn byte_size(&self) -> u64;
}

/// Graphics memory consumption snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    pub used: u64,
    pub budget: u64,
}

impl MemoryUsage {
    /// Used share of the budget; zero when the budget is unknown
    pub fn fraction(&self) -> f32 {
        if self.budget == 0 {
            return 0.0;
        }
        (self.used as f64 / self.budget as f64) as f32
    }
}

/// Source of rendered frames
pub trait RenderSource: Send + Sync {
    /// Render frame `index`
    ///
    /// `None` means the frame could not be produced; the recorder keeps
    /// its slot and skips it downstream.
    fn render(&self, index: u64) -> Option<RawHandle>;

    /// Current graphics memory consumption
    fn memory_usage(&self) -> MemoryUsage;
}

/// Tracks bytes held by live synthetic textures
#[derive(Debug)]
struct MemoryLedger {
    used: AtomicU64,
    budget: u64,
}

struct SyntheticTexture {
    pixels: Vec<u8>,
    ledger: Arc<MemoryLedger>,
}

impl DeviceTexture for SyntheticTexture {
    fn read_back(&self) -> Result<Vec<u8>, StageError> {
        Ok(self.pixels.clone())
    }

    fn byte_size(&self) -> u64 {
        self.pixels.len() as u64
    }
}

impl Drop for SyntheticTexture {
    fn drop(&mut self) {
        self.ledger
            .used
            .fetch_sub(self.pixels.len() as u64, Ordering::AcqRel);
    }
}

/// Render source producing moving RGBA gradients
///
/// Device memory is simulated: each frame is charged against the budget
/// until its texture is dropped by the convert stage.
pub struct SyntheticRenderSource {
    width: u32,
    height: u32,
    ledger: Arc<MemoryLedger>,
    missing_every: Option<u64>,
}

impl SyntheticRenderSource {
    pub fn new(width: u32, height: u32, memory_budget: u64) -> Self {
        Self {
            width,
            height,
            ledger: Arc::new(MemoryLedger {
                used: AtomicU64::new(0),
                budget: memory_budget,
            }),
            missing_every: None,
        }
    }

    /// Fail to render every `n`-th frame (1-based), for exercising skips
    pub fn with_missing_frames(mut self, n: u64) -> Self {
        self.missing_every = (n > 0).then_some(n);
        self
    }

    fn gradient(&self, index: u64) -> Vec<u8> {
        let (width, height) = (self.width.max(1), self.height.max(1));
        let shift = (index % 256) as u8;
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(((x * 255 / width) as u8).wrapping_add(shift));
                pixels.push((y * 255 / height) as u8);
                pixels.push(shift);
                pixels.push(255);
            }
        }
        pixels
    }
}

impl RenderSource for SyntheticRenderSource {
    fn render(&self, index: u64) -> Option<RawHandle> {
        if self
            .missing_every
            .is_some_and(|n| (index + 1) % n == 0)
        {
            trace!(index, "Synthetic source dropping frame");
            return None;
        }
        let pixels = self.gradient(index);
        self.ledger
            .used
            .fetch_add(pixels.len() as u64, Ordering::AcqRel);
        Some(RawHandle {
            width: self.width,
            height: self.height,
            texture: Arc::new(SyntheticTexture {
                pixels,
                ledger: Arc::clone(&self.ledger),
            }),
        })
    }

    fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            used: self.ledger.used.load(Ordering::Acquire),
            budget: self.ledger.budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_memory_is_released_on_drop() {
        let source = SyntheticRenderSource::new(4, 2, 1024);
        let frame = source.render(0).unwrap();
        assert_eq!(source.memory_usage().used, 32);
        assert_eq!(frame.texture.read_back().unwrap().len(), 32);
        drop(frame);
        assert_eq!(source.memory_usage().used, 0);
    }

    #[test]
    fn test_missing_frames() {
        let source = SyntheticRenderSource::new(2, 2, 0).with_missing_frames(3);
        let rendered: Vec<bool> = (0..6).map(|i| source.render(i).is_some()).collect();
        assert_eq!(rendered, vec![true, true, false, true, true, false]);
    }

    #[test]
    fn test_fraction_without_budget() {
        let usage = MemoryUsage { used: 10, budget: 0 };
        assert_eq!(usage.fraction(), 0.0);
        let usage = MemoryUsage { used: 25, budget: 100 };
        assert!((usage.fraction() - 0.25).abs() < f32::EPSILON);
    }
}
