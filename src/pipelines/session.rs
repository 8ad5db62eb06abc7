// SPDX-License-Identifier: GPL-3.0-only

//! Recording session and chunk management
//!
//! A session owns everything one recording needs: the ingestion queue,
//! the flush coordinator, the chunk registry and the host collaborators.
//! Its monitor task decides when to flush:
//!
//! - the ingestion queue reached the chunk size while capture is running
//! - a producer raised a memory-pressure flush request
//! - every producer stopped and directories are waiting to be muxed
//!
//! After an end-of-capture flush one directory is handed to the muxer;
//! once none are left the host gets its idle runtime settings back.

use crate::backends::render::{RenderSource, SyntheticRenderSource};
use crate::backends::runtime::{InMemoryRuntime, RuntimeController, RuntimeProfile, RuntimeSettings};
use crate::config::Config;
use crate::constants::synthetic;
use crate::errors::{CaptureError, ConfigError, RecorderError, RecorderResult};
use crate::pipelines::capture::{CaptureProducer, CaptureRequest, ChunkRegistry, FlushSignal};
use crate::pipelines::counters::{SessionCounters, SessionSnapshot};
use crate::pipelines::flush::{
    FlushOutcome, FlushReport, FrameCodec, ImageCodec, PipelineCoordinator, StageWeights,
};
use crate::pipelines::muxer::{ChunkMuxer, FfmpegMuxer, MuxJob};
use crate::pipelines::queue::IngestQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Builds a [`RecordingSession`], defaulting every collaborator
pub struct SessionBuilder {
    config: Config,
    source: Option<Arc<dyn RenderSource>>,
    muxer: Option<Arc<dyn ChunkMuxer>>,
    runtime: Option<Arc<dyn RuntimeSettings>>,
    codec: Option<Arc<dyn FrameCodec>>,
    cancel: Option<CancellationToken>,
}

impl SessionBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            source: None,
            muxer: None,
            runtime: None,
            codec: None,
            cancel: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn RenderSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_muxer(mut self, muxer: Arc<dyn ChunkMuxer>) -> Self {
        self.muxer = Some(muxer);
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn RuntimeSettings>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Share a cancellation token owned by the caller (e.g. Ctrl-C)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<Arc<RecordingSession>, ConfigError> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let source = self.source.unwrap_or_else(|| {
            Arc::new(SyntheticRenderSource::new(
                synthetic::WIDTH,
                synthetic::HEIGHT,
                synthetic::MEMORY_BUDGET,
            ))
        });
        let muxer = self
            .muxer
            .unwrap_or_else(|| Arc::new(FfmpegMuxer::new(config.ffmpeg_path.clone())));
        let runtime = self
            .runtime
            .unwrap_or_else(|| Arc::new(InMemoryRuntime::new(RuntimeProfile::default())));
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(ImageCodec::new(config.output_format)));
        let cancel = self.cancel.unwrap_or_default();

        let counters = Arc::new(SessionCounters::new());
        let coordinator = Arc::new(PipelineCoordinator::new(
            Arc::clone(&config),
            codec,
            Arc::clone(&counters),
            cancel.clone(),
        ));
        let producer = CaptureProducer {
            config: Arc::clone(&config),
            source,
            ingest: IngestQueue::bounded(config.frame_chunk_size),
            counters,
            registry: Arc::new(ChunkRegistry::new()),
            flush_signal: Arc::new(FlushSignal::default()),
            cancel: cancel.clone(),
        };

        Ok(Arc::new(RecordingSession {
            runtime: RuntimeController::new(runtime, &config),
            config,
            producer,
            coordinator,
            muxer,
            cancel,
            busy: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
            monitor: Mutex::new(None),
        }))
    }
}

/// One recording: producers, flush monitor and their shared state
pub struct RecordingSession {
    config: Arc<Config>,
    producer: CaptureProducer,
    coordinator: Arc<PipelineCoordinator>,
    muxer: Arc<dyn ChunkMuxer>,
    runtime: RuntimeController,
    cancel: CancellationToken,
    /// Monitor steps (flush or hand-off) in progress
    busy: AtomicUsize,
    history: Mutex<Vec<FlushReport>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl RecordingSession {
    pub fn builder(config: Config) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ingest(&self) -> &IngestQueue {
        &self.producer.ingest
    }

    pub fn coordinator(&self) -> &Arc<PipelineCoordinator> {
        &self.coordinator
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a capture producer
    ///
    /// Rejects invalid requests synchronously. Starts the flush monitor on
    /// first use and switches the host to its capturing profile.
    pub fn start_capture(self: &Arc<Self>, request: CaptureRequest) -> RecorderResult<JoinHandle<()>> {
        request.validate()?;
        if self.cancel.is_cancelled() {
            return Err(CaptureError::SessionClosed.into());
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(RecorderError::Other(
                "Capture must be started from within a tokio runtime".to_string(),
            ));
        }

        self.spawn_monitor();
        self.runtime.enter_capturing();
        Ok(self.producer.start(request)?)
    }

    /// Ask the monitor to flush at its next check, regardless of queue size
    pub fn request_flush(&self) {
        self.producer.flush_signal.request();
        self.producer.registry.notify();
    }

    /// Signal cancellation to producers, the monitor and any running flush
    pub fn cancel(&self) {
        info!("Cancelling recording session");
        self.cancel.cancel();
        self.producer.registry.notify();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn counters(&self) -> SessionSnapshot {
        self.producer.counters.snapshot()
    }

    /// Reports of every flush cycle that ran, oldest first
    pub fn flush_history(&self) -> Vec<FlushReport> {
        self.lock_history().clone()
    }

    pub fn weights(&self) -> StageWeights {
        self.coordinator.weights()
    }

    fn lock_history(&self) -> MutexGuard<'_, Vec<FlushReport>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// No producer running, nothing queued or awaiting mux, no flush active
    pub fn is_idle(&self) -> bool {
        self.producer.registry.capturing() == 0
            && self.producer.registry.pending() == 0
            && self.producer.ingest.is_empty()
            && !self.coordinator.is_flushing()
            && self.busy.load(Ordering::Acquire) == 0
    }

    /// Suspend until the session is idle; returns early on cancellation
    pub async fn wait_until_idle(&self) {
        loop {
            let changed = self.producer.registry.changed();
            if self.is_idle() || self.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = changed => {}
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    /// Cancel, wait for the monitor to stop and restore idle runtime settings
    pub async fn shutdown(&self) {
        self.cancel();
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }
        self.runtime.restore();
    }

    fn spawn_monitor(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.is_none() {
            let session = Arc::clone(self);
            *monitor = Some(tokio::spawn(async move { session.run_monitor().await }));
        }
    }

    /// Flush trigger loop; runs until the session is cancelled
    pub async fn run_monitor(&self) {
        debug!("Chunk monitor started");
        let registry = &self.producer.registry;
        loop {
            let changed = registry.changed();
            if self.cancel.is_cancelled() {
                break;
            }

            let capturing = registry.capturing();
            let queued = self.producer.ingest.len();
            let memory_pressure = self.producer.flush_signal.is_requested();

            let outcome = if capturing > 0
                && (queued >= self.config.frame_chunk_size || (memory_pressure && queued > 0))
            {
                Some(self.flush_chunk(memory_pressure).await)
            } else if capturing == 0 && registry.pending() > 0 {
                Some(self.flush_destination().await)
            } else {
                None
            };

            match outcome {
                Some(FlushOutcome::Cancelled) => break,
                Some(FlushOutcome::Completed | FlushOutcome::Empty) => continue,
                // Another cycle holds the flag; retry once it had time to finish
                Some(FlushOutcome::Skipped) | None => {}
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = changed => {}
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
        debug!("Chunk monitor stopped");
    }

    /// Mid-capture flush triggered by chunk size or memory pressure
    async fn flush_chunk(&self, memory_pressure: bool) -> FlushOutcome {
        self.busy.fetch_add(1, Ordering::AcqRel);
        if memory_pressure {
            self.producer.flush_signal.take();
            info!("Flushing early under memory pressure");
        }
        self.runtime.enter_flushing();
        let report = self.coordinator.run_flush(&self.producer.ingest).await;
        let outcome = report.outcome;
        if memory_pressure && outcome == FlushOutcome::Skipped {
            self.producer.flush_signal.request();
        }
        self.record(report);
        if self.producer.registry.capturing() > 0 && !self.cancel.is_cancelled() {
            self.runtime.enter_capturing();
        }
        self.finish_step(outcome);
        outcome
    }

    /// End-of-capture flush, then hand one directory to the muxer
    ///
    /// Nothing is popped while another cycle is still running: its frames
    /// may belong to the directory.
    async fn flush_destination(&self) -> FlushOutcome {
        self.busy.fetch_add(1, Ordering::AcqRel);
        self.runtime.enter_flushing();
        let report = self.coordinator.run_flush(&self.producer.ingest).await;
        let outcome = report.outcome;
        self.record(report);
        if matches!(outcome, FlushOutcome::Cancelled | FlushOutcome::Skipped) {
            self.finish_step(outcome);
            return outcome;
        }
        self.producer.flush_signal.take();

        let registry = &self.producer.registry;
        if let Some(directory) = registry.pop_destination() {
            let written = self.coordinator.frames_written_to(&directory);
            if written == 0 {
                info!(path = %directory.display(), "No frames written, skipping mux");
            } else {
                self.muxer.stitch(MuxJob {
                    directory,
                    framerate: self.config.capture_target_framerate,
                    extension: self.config.output_format.extension(),
                });
            }
        }
        if registry.pending() == 0 && registry.capturing() == 0 {
            info!(counters = ?self.counters(), "All chunks flushed, restoring runtime settings");
            self.runtime.restore();
        } else if registry.capturing() > 0 {
            self.runtime.enter_capturing();
        }
        self.finish_step(outcome);
        outcome
    }

    fn record(&self, report: FlushReport) {
        if report.ran() {
            self.lock_history().push(report);
        }
    }

    fn finish_step(&self, outcome: FlushOutcome) {
        self.busy.fetch_sub(1, Ordering::AcqRel);
        // Nothing changed on a skipped attempt
        if outcome != FlushOutcome::Skipped {
            self.producer.registry.notify();
        }
    }
}
