// SPDX-License-Identifier: GPL-3.0-only

//! Capture producers
//!
//! A producer renders a fixed number of frames at the scaled capture rate
//! and enqueues them for the next flush. Enqueueing suspends while the
//! ingestion queue is draining or full; frames are never dropped to keep
//! up. When a producer stops, however it stops, its output directory is
//! queued for muxing.

use crate::backends::render::RenderSource;
use crate::config::Config;
use crate::errors::CaptureError;
use crate::pipelines::counters::SessionCounters;
use crate::pipelines::frame::{FrameItem, FramePayload, frame_destination};
use crate::pipelines::queue::IngestQueue;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Parameters of one capture run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Frames to capture
    pub target_frames: i64,
    /// Directory the frames are written to
    pub output_dir: PathBuf,
}

impl CaptureRequest {
    pub fn new(target_frames: i64, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_frames,
            output_dir: output_dir.into(),
        }
    }

    /// Check the request, returning the frame count
    pub fn validate(&self) -> Result<u64, CaptureError> {
        if self.target_frames < 0 {
            return Err(CaptureError::NegativeTarget(self.target_frames));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(CaptureError::EmptyDestination);
        }
        Ok(self.target_frames as u64)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    capturing: usize,
    destinations: VecDeque<PathBuf>,
}

/// Running producers and the directories awaiting muxing
#[derive(Debug, Default)]
pub struct ChunkRegistry {
    state: Mutex<RegistryState>,
    changed: Notify,
}

impl ChunkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin_capture(&self) {
        self.lock().capturing += 1;
        self.notify();
    }

    /// Producer stopped; its directory joins the mux queue
    pub fn finish_capture(&self, output_dir: PathBuf) {
        {
            let mut state = self.lock();
            state.capturing = state.capturing.saturating_sub(1);
            state.destinations.push_back(output_dir);
        }
        self.notify();
    }

    /// Producers currently running
    pub fn capturing(&self) -> usize {
        self.lock().capturing
    }

    /// Directories waiting to be muxed
    pub fn pending(&self) -> usize {
        self.lock().destinations.len()
    }

    pub fn pop_destination(&self) -> Option<PathBuf> {
        let destination = self.lock().destinations.pop_front();
        self.notify();
        destination
    }

    /// Wakes the session monitor and idle waiters
    pub fn notify(&self) {
        self.changed.notify_waiters();
    }

    pub fn changed(&self) -> tokio::sync::futures::Notified<'_> {
        self.changed.notified()
    }
}

/// Out-of-band flush request raised under memory pressure
#[derive(Debug, Default)]
pub struct FlushSignal {
    requested: AtomicBool,
}

impl FlushSignal {
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Consume a pending request
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Shared handles a producer works with
#[derive(Clone)]
pub struct CaptureProducer {
    pub config: Arc<Config>,
    pub source: Arc<dyn RenderSource>,
    pub ingest: IngestQueue,
    pub counters: Arc<SessionCounters>,
    pub registry: Arc<ChunkRegistry>,
    pub flush_signal: Arc<FlushSignal>,
    pub cancel: CancellationToken,
}

/// Registers the output directory when the producer stops
struct CaptureGuard {
    registry: Arc<ChunkRegistry>,
    output_dir: PathBuf,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.registry
            .finish_capture(std::mem::take(&mut self.output_dir));
    }
}

impl CaptureProducer {
    /// Validate `request` and spawn the capture loop
    ///
    /// Invalid requests are rejected before any state changes.
    pub fn start(
        &self,
        request: CaptureRequest,
    ) -> Result<tokio::task::JoinHandle<()>, CaptureError> {
        let frames = request.validate()?;
        if self.cancel.is_cancelled() {
            return Err(CaptureError::SessionClosed);
        }

        self.registry.begin_capture();
        self.counters.add_target(frames as usize);
        let guard = CaptureGuard {
            registry: Arc::clone(&self.registry),
            output_dir: request.output_dir.clone(),
        };
        info!(frames, path = %request.output_dir.display(), "Starting capture");

        let producer = self.clone();
        Ok(tokio::spawn(async move {
            producer.run(frames, request.output_dir).await;
            drop(guard);
        }))
    }

    async fn run(&self, frames: u64, output_dir: PathBuf) {
        let extension = self.config.output_format.extension();
        let mut ticker = tokio::time::interval(self.config.capture_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut captured = 0;
        for index in 0..frames {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let payload = self.source.render(index).map(FramePayload::RawHandle);
            if payload.is_none() {
                warn!(index, "Render source produced no frame, keeping an empty slot");
            }
            let item = FrameItem::new(payload, frame_destination(&output_dir, index, extension));
            if self.ingest.enqueue(item, &self.cancel).await.is_err() {
                break;
            }
            captured += 1;
            self.counters.record_captured();
            self.check_memory();
            self.registry.notify();
        }

        if captured < frames {
            info!(captured, frames, path = %output_dir.display(), "Capture cancelled");
        } else {
            info!(frames, path = %output_dir.display(), "Capture finished");
        }
    }

    /// Request an early flush when device memory crosses the threshold
    fn check_memory(&self) {
        let usage = self.source.memory_usage();
        let fraction = usage.fraction();
        if fraction >= self.config.memory_flush_fraction && !self.flush_signal.is_requested() {
            debug!(
                used = usage.used,
                budget = usage.budget,
                fraction,
                "Graphics memory threshold crossed, requesting flush"
            );
            self.flush_signal.request();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_target_is_rejected() {
        let request = CaptureRequest::new(-1, "/tmp/out");
        assert_eq!(request.validate(), Err(CaptureError::NegativeTarget(-1)));
    }

    #[test]
    fn test_empty_destination_is_rejected() {
        let request = CaptureRequest::new(10, "");
        assert_eq!(request.validate(), Err(CaptureError::EmptyDestination));
    }

    #[test]
    fn test_zero_frames_is_valid() {
        assert_eq!(CaptureRequest::new(0, "out").validate(), Ok(0));
    }

    #[test]
    fn test_registry_tracks_producers_and_destinations() {
        let registry = ChunkRegistry::new();
        registry.begin_capture();
        registry.begin_capture();
        registry.finish_capture(PathBuf::from("a"));
        assert_eq!(registry.capturing(), 1);
        assert_eq!(registry.pending(), 1);
        registry.finish_capture(PathBuf::from("b"));
        assert_eq!(registry.pop_destination(), Some(PathBuf::from("a")));
        assert_eq!(registry.pop_destination(), Some(PathBuf::from("b")));
        assert_eq!(registry.pop_destination(), None);
        assert_eq!(registry.capturing(), 0);
    }

    #[test]
    fn test_flush_signal_is_consumed_once() {
        let signal = FlushSignal::default();
        assert!(!signal.take());
        signal.request();
        assert!(signal.take());
        assert!(!signal.take());
    }
}
