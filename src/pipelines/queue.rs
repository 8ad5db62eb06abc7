// SPDX-License-Identifier: GPL-3.0-only

//! Lockable frame queues
//!
//! [`LockableQueue`] is the FIFO every stage reads from and writes to.
//! [`IngestQueue`] is the slot producers write captured frames into: a
//! flush marks its current queue as draining, consumes it, and installs
//! a fresh instance instead of reusing the drained one.

use super::frame::FrameItem;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Why a queue refused an item
#[derive(Debug, PartialEq, Eq)]
pub enum PushRejected {
    /// The queue is being drained by a flush cycle
    Draining,
    /// The queue already holds its capacity
    Full,
}

/// FIFO of frame items with a draining flag
///
/// Enqueue and dequeue each take the queue's own lock; a hand-off between
/// two queues is two independent operations.
#[derive(Debug)]
pub struct LockableQueue {
    items: Mutex<VecDeque<FrameItem>>,
    draining: AtomicBool,
    /// Total items ever pushed, never decremented
    pushed: AtomicUsize,
    capacity: Option<usize>,
    item_ready: Notify,
}

impl LockableQueue {
    /// Unbounded queue (stage outputs)
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Queue refusing writes once it holds `capacity` items
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(Some(capacity))
    }

    fn build(capacity: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.unwrap_or(0))),
            draining: AtomicBool::new(false),
            pushed: AtomicUsize::new(0),
            capacity,
            item_ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FrameItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer-side enqueue; hands the item back when refused
    ///
    /// The draining flag is read under the queue lock, so no write can
    /// land after a flush has taken its snapshot.
    pub fn try_push(&self, item: FrameItem) -> Result<(), (FrameItem, PushRejected)> {
        let mut items = self.lock();
        if self.draining.load(Ordering::Acquire) {
            return Err((item, PushRejected::Draining));
        }
        if self.capacity.is_some_and(|capacity| items.len() >= capacity) {
            return Err((item, PushRejected::Full));
        }
        items.push_back(item);
        self.pushed.fetch_add(1, Ordering::AcqRel);
        drop(items);
        self.item_ready.notify_one();
        Ok(())
    }

    /// Stage-side enqueue, ignores draining and capacity
    pub fn push(&self, item: FrameItem) {
        self.lock().push_back(item);
        self.pushed.fetch_add(1, Ordering::AcqRel);
        self.item_ready.notify_one();
    }

    /// Dequeue the oldest item; `None` is transient emptiness, not an end
    pub fn try_pop(&self) -> Option<FrameItem> {
        self.lock().pop_front()
    }

    /// Suspend until an item may be available, the poll interval passes,
    /// or `cancel` fires
    pub async fn wait_for_item(&self, cancel: &CancellationToken, poll: Duration) {
        let ready = self.item_ready.notified();
        if !self.is_empty() {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = ready => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of items ever enqueued
    pub fn pushed(&self) -> usize {
        self.pushed.load(Ordering::Acquire)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Mark the queue as draining and snapshot its length
    ///
    /// Returns `None`, leaving the queue untouched, when it is empty.
    pub fn begin_drain(&self) -> Option<usize> {
        let items = self.lock();
        if items.is_empty() {
            return None;
        }
        self.draining.store(true, Ordering::Release);
        Some(items.len())
    }

    /// Drop anything left in the queue
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for LockableQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared slot holding the current ingestion queue
///
/// Cloning is cheap; every clone sees the same slot. Producers are woken
/// through the watch channel whenever a drained queue is retired.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    slot: Arc<watch::Sender<Arc<LockableQueue>>>,
    capacity: Option<usize>,
}

impl IngestQueue {
    /// Slot whose queues hold at most `capacity` frames
    pub fn bounded(capacity: usize) -> Self {
        Self::build(Some(capacity))
    }

    /// Slot with unbounded queues
    pub fn unbounded() -> Self {
        Self::build(None)
    }

    fn build(capacity: Option<usize>) -> Self {
        let (slot, _) = watch::channel(Arc::new(Self::fresh(capacity)));
        Self {
            slot: Arc::new(slot),
            capacity,
        }
    }

    fn fresh(capacity: Option<usize>) -> LockableQueue {
        match capacity {
            Some(capacity) => LockableQueue::with_capacity(capacity),
            None => LockableQueue::new(),
        }
    }

    /// The queue producers currently write into
    pub fn current(&self) -> Arc<LockableQueue> {
        self.slot.borrow().clone()
    }

    /// Frames waiting in the current queue
    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Enqueue a captured frame, suspending while the current queue is
    /// draining or full
    ///
    /// The wait has no timeout: frames are never dropped to make room.
    /// Returns the item back only when `cancel` fires first.
    pub async fn enqueue(
        &self,
        mut item: FrameItem,
        cancel: &CancellationToken,
    ) -> Result<(), FrameItem> {
        let mut changes = self.slot.subscribe();
        loop {
            let queue = changes.borrow_and_update().clone();
            match queue.try_push(item) {
                Ok(()) => return Ok(()),
                Err((rejected, reason)) => {
                    trace!(?reason, "Ingestion queue refused frame, waiting");
                    item = rejected;
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(item),
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(item);
                    }
                }
            }
        }
    }

    /// Start draining the current queue
    ///
    /// Returns the queue and its frame count, or `None` when there is
    /// nothing to drain.
    pub fn begin_drain(&self) -> Option<(Arc<LockableQueue>, usize)> {
        let queue = self.current();
        let count = queue.begin_drain()?;
        Some((queue, count))
    }

    /// Replace a drained queue with a fresh instance and wake producers
    pub fn retire(&self, drained: &Arc<LockableQueue>) {
        let replaced = self.slot.send_if_modified(|current| {
            if Arc::ptr_eq(current, drained) {
                *current = Arc::new(Self::fresh(self.capacity));
                true
            } else {
                false
            }
        });
        debug!(replaced, "Retired drained ingestion queue");
    }
}
