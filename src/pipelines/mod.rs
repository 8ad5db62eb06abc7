// SPDX-License-Identifier: MPL-2.0

//! Frame capture and flush pipelines
//!
//! Capture never waits on disk. Producers only render and enqueue; the
//! heavy work runs later, in chunks, on the shared worker pool.
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────────────┐
//! │   Capture    │ ──▶ │  Ingestion   │ ──▶ │       Flush cycle        │
//! │  producers   │     │    queue     │     │ convert → extract →      │
//! │ (N, shared)  │     │ (chunk-size) │     │ encode → persist (disk)  │
//! └──────────────┘     └──────────────┘     └────────────┬─────────────┘
//!                                                        │
//!                      ┌──────────────┐     ┌────────────▼─────────────┐
//!                      │    Muxer     │ ◀── │  Session chunk monitor   │
//!                      │   (ffmpeg)   │     │                          │
//!                      └──────────────┘     └──────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`capture`]: Capture producers and the chunk registry
//! - [`flush`]: Flush coordinator, stage workers and weights
//! - [`queue`]: Lockable queues and the ingestion slot
//! - [`session`]: Session lifecycle and flush triggers
//! - [`muxer`]: Hand-off of flushed directories to a video encoder

pub mod capture;
pub mod counters;
pub mod flush;
pub mod frame;
pub mod muxer;
pub mod queue;
pub mod session;

pub use capture::CaptureRequest;
pub use counters::SessionSnapshot;
pub use flush::{FlushOutcome, FlushReport, PipelineCoordinator, Stage, StageWeights};
pub use frame::{FrameItem, FramePayload};
pub use queue::{IngestQueue, LockableQueue};
pub use session::{RecordingSession, SessionBuilder};
