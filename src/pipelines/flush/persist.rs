// SPDX-License-Identifier: GPL-3.0-only

//! Persist stage: encoded frames to disk
//!
//! Writes run as detached tasks so the persist workers never wait on
//! disk latency. A frame only counts as persisted once its write has
//! finished; writes still running when the cycle is cancelled are
//! abandoned and never counted.

use crate::pipelines::counters::SessionCounters;
use crate::pipelines::frame::{FrameItem, FramePayload};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

/// Completion counters of one flush cycle
#[derive(Debug, Default)]
pub struct FlushProgress {
    dispatched: AtomicUsize,
    persisted: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    changed: Notify,
}

impl FlushProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames handed to the writer so far
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Acquire)
    }

    /// Frames that cleared the persist stage (written, skipped or failed)
    pub fn persisted(&self) -> usize {
        self.persisted.load(Ordering::Acquire)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Acquire)
    }

    /// Wakes every task waiting on cycle progress
    pub fn notify(&self) {
        self.changed.notify_waiters();
    }

    /// Future resolving on the next [`FlushProgress::notify`]
    pub fn changed(&self) -> tokio::sync::futures::Notified<'_> {
        self.changed.notified()
    }
}

/// How one frame left the persist stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersistOutcome {
    Written,
    Skipped,
    Failed,
}

/// Writes encoded frames and creates output directories on first use
#[derive(Debug)]
pub struct PersistSink {
    /// Directories created so far, with the frames written into each
    created_dirs: Mutex<HashMap<PathBuf, usize>>,
    counters: Arc<SessionCounters>,
}

impl PersistSink {
    pub fn new(counters: Arc<SessionCounters>) -> Self {
        Self {
            created_dirs: Mutex::new(HashMap::new()),
            counters,
        }
    }

    /// Frames written into `dir` so far
    pub fn written_to(&self, dir: &Path) -> usize {
        self.lock_dirs().get(dir).copied().unwrap_or(0)
    }

    /// Hand a frame to a detached write task tracked by `tracker`
    pub fn dispatch(
        self: &Arc<Self>,
        item: FrameItem,
        progress: &Arc<FlushProgress>,
        tracker: &TaskTracker,
        cancel: &CancellationToken,
    ) {
        progress.dispatched.fetch_add(1, Ordering::AcqRel);
        progress.notify();

        let sink = Arc::clone(self);
        let progress = Arc::clone(progress);
        let cancel = cancel.clone();
        tracker.spawn(async move {
            let destination = item.destination.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(path = %destination.display(), "Write abandoned on cancellation");
                }
                outcome = sink.write(item) => sink.complete(outcome, &progress),
            }
        });
    }

    async fn write(&self, item: FrameItem) -> PersistOutcome {
        let data = match item.payload {
            Some(FramePayload::EncodedBytes(encoded)) => encoded.data,
            Some(other) => {
                warn!(
                    path = %item.destination.display(),
                    payload = other.kind(),
                    "Persist stage received an unencoded payload"
                );
                return PersistOutcome::Failed;
            }
            None if item.failed => return PersistOutcome::Failed,
            None => {
                trace!(path = %item.destination.display(), "Skipping frame without payload");
                return PersistOutcome::Skipped;
            }
        };

        if let Some(parent) = item.destination.parent() {
            if let Err(e) = self.ensure_dir(parent).await {
                warn!(path = %parent.display(), error = %e, "Failed to create output directory");
                return PersistOutcome::Failed;
            }
        }

        match tokio::fs::write(&item.destination, &data).await {
            Ok(()) => {
                if let Some(parent) = item.destination.parent() {
                    *self.lock_dirs().entry(parent.to_path_buf()).or_default() += 1;
                }
                trace!(path = %item.destination.display(), bytes = data.len(), "Frame written");
                PersistOutcome::Written
            }
            Err(e) => {
                warn!(path = %item.destination.display(), error = %e, "Failed to write frame");
                PersistOutcome::Failed
            }
        }
    }

    async fn ensure_dir(&self, dir: &Path) -> std::io::Result<()> {
        if dir.as_os_str().is_empty() || self.lock_dirs().contains_key(dir) {
            return Ok(());
        }
        tokio::fs::create_dir_all(dir).await?;
        self.lock_dirs().entry(dir.to_path_buf()).or_default();
        debug!(path = %dir.display(), "Created output directory");
        Ok(())
    }

    fn lock_dirs(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, usize>> {
        self.created_dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, outcome: PersistOutcome, progress: &FlushProgress) {
        match outcome {
            PersistOutcome::Written => {}
            PersistOutcome::Skipped => {
                progress.skipped.fetch_add(1, Ordering::AcqRel);
                self.counters.record_skipped();
            }
            PersistOutcome::Failed => {
                progress.failed.fetch_add(1, Ordering::AcqRel);
                self.counters.record_failed();
            }
        }
        progress.persisted.fetch_add(1, Ordering::AcqRel);
        self.counters.record_persisted();
        progress.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::frame::EncodedBytes;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("frame-recorder-persist-{}", uuid::Uuid::new_v4()))
    }

    async fn drain(sink: &Arc<PersistSink>, items: Vec<FrameItem>) -> Arc<FlushProgress> {
        let progress = Arc::new(FlushProgress::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        for item in items {
            sink.dispatch(item, &progress, &tracker, &cancel);
        }
        tracker.close();
        tracker.wait().await;
        progress
    }

    #[tokio::test]
    async fn test_writes_into_new_directory() {
        let dir = scratch_dir().join("nested");
        let counters = Arc::new(SessionCounters::new());
        let sink = Arc::new(PersistSink::new(counters.clone()));
        let item = FrameItem::new(
            Some(FramePayload::EncodedBytes(EncodedBytes { data: vec![7; 16] })),
            dir.join("0000.png"),
        );

        let progress = drain(&sink, vec![item]).await;
        assert_eq!(progress.persisted(), 1);
        assert_eq!(std::fs::read(dir.join("0000.png")).unwrap().len(), 16);
        assert_eq!(counters.snapshot().written(), 1);
        assert_eq!(sink.written_to(&dir), 1);

        let _ = std::fs::remove_dir_all(dir.parent().unwrap());
    }

    #[tokio::test]
    async fn test_null_and_failed_payloads_are_counted_not_written() {
        let dir = scratch_dir();
        let counters = Arc::new(SessionCounters::new());
        let sink = Arc::new(PersistSink::new(counters.clone()));
        let items = vec![
            FrameItem::skipped(dir.join("0000.png")),
            FrameItem::skipped(dir.join("0001.png")).into_failed(),
        ];

        let progress = drain(&sink, items).await;
        assert_eq!(progress.persisted(), 2);
        assert_eq!(progress.skipped(), 1);
        assert_eq!(progress.failed(), 1);
        assert!(!dir.exists());
        assert_eq!(sink.written_to(&dir), 0);
    }

    #[tokio::test]
    async fn test_cancelled_write_is_not_counted() {
        let counters = Arc::new(SessionCounters::new());
        let sink = Arc::new(PersistSink::new(counters.clone()));
        let progress = Arc::new(FlushProgress::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        sink.dispatch(
            FrameItem::skipped(PathBuf::from("never.png")),
            &progress,
            &tracker,
            &cancel,
        );
        tracker.close();
        tracker.wait().await;

        assert_eq!(progress.dispatched(), 1);
        assert_eq!(progress.persisted(), 0);
        assert_eq!(counters.persisted(), 0);
    }
}
