// SPDX-License-Identifier: GPL-3.0-only

//! Stage worker loop

use super::{FlushCycle, Stage, codec};
use crate::errors::StageError;
use crate::pipelines::frame::FrameItem;
use std::sync::Arc;
use tracing::{trace, warn};

/// One worker instance of a stage inside a flush cycle
pub(super) struct StageWorker {
    pub stage: Stage,
    pub id: usize,
    pub cycle: Arc<FlushCycle>,
}

impl StageWorker {
    /// Move frames from the stage's input to its output until the stage
    /// has produced the cycle's snapshot count or the cycle is cancelled
    pub async fn run(self) {
        let cycle = &self.cycle;
        let input = cycle.input_of(self.stage);
        trace!(stage = %self.stage, worker = self.id, "Worker started");

        loop {
            if cycle.cancel.is_cancelled() {
                break;
            }
            if cycle.produced(self.stage) >= cycle.target {
                break;
            }

            // Emptiness is transient while upstream is still running
            let Some(item) = input.try_pop() else {
                input.wait_for_item(&cycle.cancel, cycle.poll).await;
                continue;
            };

            if self.stage == Stage::Persist {
                cycle
                    .sink
                    .dispatch(item, &cycle.progress, &cycle.tracker, &cycle.cancel);
                continue;
            }

            let Some(item) = self.transform(item).await else {
                break;
            };
            if let Some(output) = cycle.output_of(self.stage) {
                output.push(item);
            }
            cycle.progress.notify();
        }

        trace!(stage = %self.stage, worker = self.id, "Worker stopped");
    }

    /// Replace the item's payload with the stage's output
    ///
    /// Returns `None` only when the cycle was cancelled mid-transform; the
    /// item is dropped unfinished.
    async fn transform(&self, mut item: FrameItem) -> Option<FrameItem> {
        let stage = self.stage;
        let Some(payload) = item.payload.take() else {
            if stage == Stage::Convert && !item.failed {
                warn!(path = %item.destination.display(), "Frame has no payload, forwarding untouched");
            }
            return Some(item);
        };

        let codec = Arc::clone(&self.cycle.codec);
        let task = tokio::task::spawn_blocking(move || codec::apply(codec.as_ref(), stage, payload));
        let result = tokio::select! {
            biased;
            _ = self.cycle.cancel.cancelled() => return None,
            result = task => result,
        };

        match result.unwrap_or_else(|e| Err(StageError::Task(e.to_string()))) {
            Ok(payload) => {
                item.payload = Some(payload);
                Some(item)
            }
            Err(e) => {
                warn!(stage = %stage, path = %item.destination.display(), error = %e, "Transform failed, skipping frame");
                Some(item.into_failed())
            }
        }
    }
}
