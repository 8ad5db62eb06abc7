// SPDX-License-Identifier: GPL-3.0-only

//! Session-wide frame counters

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Frame counters shared by producers, the coordinator and the session
///
/// Every counter only ever grows. `persisted` counts frames that cleared
/// the persist stage, including the ones counted as skipped or failed.
#[derive(Debug, Default)]
pub struct SessionCounters {
    captured: AtomicUsize,
    persisted: AtomicUsize,
    target: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

/// Point-in-time copy of [`SessionCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SessionSnapshot {
    pub captured: usize,
    pub persisted: usize,
    pub target: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SessionSnapshot {
    /// Frames actually written to disk
    pub fn written(&self) -> usize {
        self.persisted
            .saturating_sub(self.skipped)
            .saturating_sub(self.failed)
    }

    /// Every requested frame cleared the pipeline
    pub fn is_complete(&self) -> bool {
        self.persisted >= self.target
    }
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_target(&self, frames: usize) {
        self.target.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn persisted(&self) -> usize {
        self.persisted.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            captured: self.captured.load(Ordering::Acquire),
            persisted: self.persisted.load(Ordering::Acquire),
            target: self.target.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_excludes_skipped_and_failed() {
        let counters = SessionCounters::new();
        counters.add_target(4);
        for _ in 0..4 {
            counters.record_persisted();
        }
        counters.record_skipped();
        counters.record_failed();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.written(), 2);
        assert!(snapshot.is_complete());
    }
}
