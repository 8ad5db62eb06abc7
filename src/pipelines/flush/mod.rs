// SPDX-License-Identifier: GPL-3.0-only

//! Flush cycle coordination
//!
//! A flush drains a snapshot of the ingestion queue through four stages:
//!
//! ```text
//! ingest ─▶ convert ─▶ extract ─▶ encode ─▶ persist ─▶ disk
//!         (weight[1])  (weight[2]) (weight[3]) (weight[4])
//! ```
//!
//! Every stage runs `weight` concurrent workers. Stages start according
//! to the configured [`TransitionMode`]; once a stage has produced the
//! whole snapshot, its weight moves to the later stages still running.
//! At most one flush runs at a time.

pub mod codec;
pub mod persist;
pub mod weights;
mod worker;

pub use codec::{FrameCodec, ImageCodec};
pub use persist::{FlushProgress, PersistSink};
pub use weights::{Stage, StageWeights};

use crate::config::{Config, TransitionMode};
use crate::pipelines::counters::SessionCounters;
use crate::pipelines::queue::{IngestQueue, LockableQueue};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use worker::StageWorker;

/// How a call to [`PipelineCoordinator::run_flush`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlushOutcome {
    /// Every snapshot frame cleared the persist stage
    Completed,
    /// Cancellation fired before the cycle finished
    Cancelled,
    /// Nothing to flush; the queue was left untouched
    Empty,
    /// Another flush was already running
    Skipped,
}

/// Summary of one flush cycle
#[derive(Debug, Clone, Serialize)]
pub struct FlushReport {
    pub outcome: FlushOutcome,
    /// Frames in the queue when the cycle started
    pub snapshot: usize,
    /// Frames that cleared the persist stage
    pub persisted: usize,
    /// Frames that had no payload
    pub skipped: usize,
    /// Frames dropped by a failed transform or write
    pub failed: usize,
    pub elapsed: Duration,
    /// Weight vector when the cycle ended
    pub weights: [usize; 5],
}

impl FlushReport {
    fn idle(outcome: FlushOutcome, weights: StageWeights) -> Self {
        Self {
            outcome,
            snapshot: 0,
            persisted: 0,
            skipped: 0,
            failed: 0,
            elapsed: Duration::ZERO,
            weights: weights.as_array(),
        }
    }

    /// Whether this call actually ran a cycle
    ///
    /// A call cancelled before it drained anything did not.
    pub fn ran(&self) -> bool {
        self.snapshot > 0
            && matches!(self.outcome, FlushOutcome::Completed | FlushOutcome::Cancelled)
    }
}

/// State guarded by the coordinator-wide lock
#[derive(Debug)]
struct CoordinatorState {
    is_flushing: bool,
    weights: StageWeights,
    /// Workers launched per stage in the current cycle
    launched: [usize; 5],
    /// Stages the current cycle has started
    open: [bool; 5],
}

/// Runs flush cycles; one instance per recording session
pub struct PipelineCoordinator {
    config: Arc<Config>,
    codec: Arc<dyn FrameCodec>,
    sink: Arc<PersistSink>,
    cancel: CancellationToken,
    state: Mutex<CoordinatorState>,
}

impl PipelineCoordinator {
    pub fn new(
        config: Arc<Config>,
        codec: Arc<dyn FrameCodec>,
        counters: Arc<SessionCounters>,
        cancel: CancellationToken,
    ) -> Self {
        let weights = config.initial_weights();
        Self {
            config,
            codec,
            sink: Arc::new(PersistSink::new(counters)),
            cancel,
            state: Mutex::new(CoordinatorState {
                is_flushing: false,
                weights,
                launched: [0; 5],
                open: [false; 5],
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_flushing(&self) -> bool {
        self.lock_state().is_flushing
    }

    /// Current weight vector (of the running or last cycle)
    pub fn weights(&self) -> StageWeights {
        self.lock_state().weights
    }

    /// Frames written into `directory` over the coordinator's lifetime
    pub fn frames_written_to(&self, directory: &Path) -> usize {
        self.sink.written_to(directory)
    }

    /// Claim the flush flag, resetting the per-cycle state
    fn try_begin(&self) -> Option<FlushGuard<'_>> {
        let mut state = self.lock_state();
        if state.is_flushing {
            return None;
        }
        state.is_flushing = true;
        state.weights = self.config.initial_weights();
        state.launched = [0; 5];
        state.open = [false; 5];
        Some(FlushGuard { coordinator: self })
    }

    /// Drain the frames currently in `ingest` through every stage
    ///
    /// Frames arriving after the snapshot wait for the next cycle. Returns
    /// once every snapshot frame cleared the persist stage, or early on
    /// cancellation. A call made while another flush runs, or on an empty
    /// queue, does nothing.
    pub async fn run_flush(self: &Arc<Self>, ingest: &IngestQueue) -> FlushReport {
        if self.cancel.is_cancelled() {
            return FlushReport::idle(FlushOutcome::Cancelled, self.weights());
        }
        let Some(_guard) = self.try_begin() else {
            debug!("Flush already running, ignoring trigger");
            return FlushReport::idle(FlushOutcome::Skipped, self.weights());
        };
        let Some((input, snapshot)) = ingest.begin_drain() else {
            debug!("Ingestion queue empty, nothing to flush");
            return FlushReport::idle(FlushOutcome::Empty, self.weights());
        };

        let started = Instant::now();
        info!(
            frames = snapshot,
            mode = ?self.config.transition_mode,
            weights = %self.weights(),
            "Starting flush"
        );

        let cycle = Arc::new(FlushCycle::new(Arc::clone(self), Arc::clone(&input), snapshot));
        let completed = self.drive(&cycle).await;

        // Teardown
        cycle.cancel.cancel();
        cycle.tracker.close();
        cycle.tracker.wait().await;
        input.clear();
        ingest.retire(&input);

        let report = FlushReport {
            outcome: if completed {
                FlushOutcome::Completed
            } else {
                FlushOutcome::Cancelled
            },
            snapshot,
            persisted: cycle.progress.persisted(),
            skipped: cycle.progress.skipped(),
            failed: cycle.progress.failed(),
            elapsed: started.elapsed(),
            weights: self.weights().as_array(),
        };
        info!(
            outcome = ?report.outcome,
            frames = report.snapshot,
            persisted = report.persisted,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            weights = ?report.weights,
            "Flush finished"
        );
        report
    }

    /// Open every stage per the transition mode, then wait for the
    /// persisted count to reach the snapshot; `false` on cancellation
    async fn drive(&self, cycle: &Arc<FlushCycle>) -> bool {
        let needed = match self.config.transition_mode {
            TransitionMode::SyncFull => cycle.target,
            TransitionMode::AsyncSemi => 1,
            TransitionMode::AsyncFull => 0,
        };

        let mut previous: Option<Stage> = None;
        for stage in Stage::DOWNSTREAM {
            if let Some(previous) = previous {
                if !cycle.wait_until(|| cycle.produced(previous) >= needed).await {
                    return false;
                }
            }
            cycle.open_stage(stage);
            cycle.spawn_redistributor(stage);
            previous = Some(stage);
        }

        cycle
            .wait_until(|| cycle.progress.persisted() >= cycle.target)
            .await
    }
}

/// Clears the flush flag when a cycle ends, however it ends
struct FlushGuard<'a> {
    coordinator: &'a PipelineCoordinator,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.lock_state().is_flushing = false;
    }
}

/// One running flush: its queues, progress and tasks
struct FlushCycle {
    coordinator: Arc<PipelineCoordinator>,
    /// Stage inputs: the drained ingestion queue, then each stage's output
    queues: [Arc<LockableQueue>; 4],
    progress: Arc<FlushProgress>,
    target: usize,
    codec: Arc<dyn FrameCodec>,
    sink: Arc<PersistSink>,
    poll: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: Instant,
}

impl FlushCycle {
    fn new(coordinator: Arc<PipelineCoordinator>, input: Arc<LockableQueue>, target: usize) -> Self {
        let codec = Arc::clone(&coordinator.codec);
        let sink = Arc::clone(&coordinator.sink);
        let poll = coordinator.config.poll_interval();
        let cancel = coordinator.cancel.child_token();
        Self {
            coordinator,
            queues: [
                input,
                Arc::new(LockableQueue::new()),
                Arc::new(LockableQueue::new()),
                Arc::new(LockableQueue::new()),
            ],
            progress: Arc::new(FlushProgress::new()),
            target,
            codec,
            sink,
            poll,
            cancel,
            tracker: TaskTracker::new(),
            started: Instant::now(),
        }
    }

    fn slot(stage: Stage) -> usize {
        stage.flush_slot().unwrap_or(0)
    }

    fn input_of(&self, stage: Stage) -> Arc<LockableQueue> {
        Arc::clone(&self.queues[Self::slot(stage)])
    }

    /// Output queue of a transform stage; persist writes to disk instead
    fn output_of(&self, stage: Stage) -> Option<&Arc<LockableQueue>> {
        match stage {
            Stage::Persist | Stage::Capture => None,
            _ => self.queues.get(Self::slot(stage) + 1),
        }
    }

    /// Frames the stage has emitted this cycle; never decreases
    fn produced(&self, stage: Stage) -> usize {
        match self.output_of(stage) {
            Some(output) => output.pushed(),
            None => self.progress.dispatched(),
        }
    }

    fn open_stage(self: &Arc<Self>, stage: Stage) {
        self.coordinator.lock_state().open[stage.index()] = true;
        debug!(stage = %stage, elapsed_ms = self.started.elapsed().as_millis() as u64, "Stage opened");
        self.ensure_workers(stage);
    }

    /// Launch workers until the stage runs as many as its weight
    ///
    /// Re-read on every call, so weight moved here by a redistribution
    /// takes effect whenever the stage is (or becomes) open.
    fn ensure_workers(self: &Arc<Self>, stage: Stage) {
        let (first_id, deficit) = {
            let mut state = self.coordinator.lock_state();
            let index = stage.index();
            if !state.open[index] || self.produced(stage) >= self.target {
                return;
            }
            let deficit = state.weights.get(stage).saturating_sub(state.launched[index]);
            let first_id = state.launched[index];
            state.launched[index] += deficit;
            (first_id, deficit)
        };

        for id in first_id..first_id + deficit {
            let worker = StageWorker {
                stage,
                id,
                cycle: Arc::clone(self),
            };
            self.tracker.spawn(worker.run());
        }
        if deficit > 0 {
            debug!(stage = %stage, workers = deficit, "Launched stage workers");
        }
    }

    /// Background task waiting for the stage to finish, then moving its
    /// weight to the later stages still running
    fn spawn_redistributor(self: &Arc<Self>, stage: Stage) {
        let cycle = Arc::clone(self);
        self.tracker.spawn(async move {
            if !cycle.wait_until(|| cycle.produced(stage) >= cycle.target).await {
                return;
            }
            let elapsed_ms = cycle.started.elapsed().as_millis() as u64;
            if cycle.coordinator.config.is_debug {
                info!(stage = %stage, elapsed_ms, "Stage complete");
            } else {
                debug!(stage = %stage, elapsed_ms, "Stage complete");
            }

            if !cycle.coordinator.config.enable_weight_redistribution {
                return;
            }
            let moved = {
                let mut state = cycle.coordinator.lock_state();
                let targets: Vec<Stage> = stage
                    .later()
                    .iter()
                    .copied()
                    .filter(|later| cycle.produced(*later) < cycle.target)
                    .collect();
                state.weights.redistribute(stage, &targets)
            };
            if moved.is_empty() {
                return;
            }
            debug!(from = %stage, ?moved, "Redistributed stage weight");
            for (target, _) in moved {
                cycle.ensure_workers(target);
            }
        });
    }

    /// Suspend until `condition` holds; `false` when cancelled first
    async fn wait_until(&self, condition: impl Fn() -> bool) -> bool {
        loop {
            let changed = self.progress.changed();
            if condition() {
                return true;
            }
            if self.cancel.is_cancelled() {
                return false;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                _ = changed => {}
                _ = tokio::time::sleep(self.poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::render::{RenderSource, SyntheticRenderSource};
    use crate::config::OutputFormat;
    use crate::pipelines::frame::{FrameItem, FramePayload};
    use std::path::PathBuf;

    fn coordinator(config: Config) -> Arc<PipelineCoordinator> {
        Arc::new(PipelineCoordinator::new(
            Arc::new(config),
            Arc::new(ImageCodec::new(OutputFormat::Png)),
            Arc::new(SessionCounters::new()),
            CancellationToken::new(),
        ))
    }

    fn fill(ingest: &IngestQueue, dir: &std::path::Path, frames: u64) {
        let source = SyntheticRenderSource::new(4, 4, 0);
        let queue = ingest.current();
        for index in 0..frames {
            let payload = source.render(index).map(FramePayload::RawHandle);
            let destination = dir.join(format!("{:04}.png", index));
            queue.push(FrameItem::new(payload, destination));
        }
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("frame-recorder-flush-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_transition_mode_persists_everything() {
        for mode in [
            TransitionMode::SyncFull,
            TransitionMode::AsyncFull,
            TransitionMode::AsyncSemi,
        ] {
            let dir = scratch_dir();
            let coordinator = coordinator(Config {
                transition_mode: mode,
                poll_interval_ms: 1,
                ..Config::default()
            });
            let ingest = IngestQueue::unbounded();
            fill(&ingest, &dir, 12);

            let report = coordinator.run_flush(&ingest).await;
            assert_eq!(report.outcome, FlushOutcome::Completed, "{:?}", mode);
            assert_eq!(report.persisted, 12, "{:?}", mode);
            assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 12, "{:?}", mode);
            assert!(!coordinator.is_flushing());

            let _ = std::fs::remove_dir_all(&dir);
        }
    }

    #[tokio::test]
    async fn test_empty_queue_is_left_untouched() {
        let coordinator = coordinator(Config::default());
        let ingest = IngestQueue::unbounded();
        let before = ingest.current();

        let report = coordinator.run_flush(&ingest).await;
        assert_eq!(report.outcome, FlushOutcome::Empty);
        assert!(!report.ran());
        assert!(Arc::ptr_eq(&before, &ingest.current()));
        assert!(!coordinator.is_flushing());
    }

    #[tokio::test]
    async fn test_cancelled_coordinator_reports_no_cycle() {
        let coordinator = coordinator(Config::default());
        let ingest = IngestQueue::unbounded();
        fill(&ingest, &scratch_dir(), 2);
        coordinator.cancel.cancel();

        let report = coordinator.run_flush(&ingest).await;
        assert_eq!(report.outcome, FlushOutcome::Cancelled);
        assert_eq!(report.snapshot, 0);
        assert!(!report.ran());
        assert_eq!(ingest.len(), 2);
    }

    #[tokio::test]
    async fn test_flag_held_elsewhere_skips_flush() {
        let coordinator = coordinator(Config::default());
        let ingest = IngestQueue::unbounded();
        fill(&ingest, &scratch_dir(), 3);

        let guard = coordinator.try_begin();
        assert!(guard.is_some());
        let report = coordinator.run_flush(&ingest).await;
        assert_eq!(report.outcome, FlushOutcome::Skipped);
        assert_eq!(ingest.len(), 3);
        drop(guard);
        assert!(!coordinator.is_flushing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_redistribution_disabled_keeps_weights() {
        let dir = scratch_dir();
        let coordinator = coordinator(Config {
            enable_weight_redistribution: false,
            stage_weights: [1, 2, 1, 3, 1],
            poll_interval_ms: 1,
            ..Config::default()
        });
        let ingest = IngestQueue::unbounded();
        fill(&ingest, &dir, 5);

        let report = coordinator.run_flush(&ingest).await;
        assert_eq!(report.persisted, 5);
        assert_eq!(report.weights, [1, 2, 1, 3, 1]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
