// SPDX-License-Identifier: MPL-2.0

//! Host collaborators the recorder talks to
//!
//! # Modules
//!
//! - [`render`]: Frame source and graphics memory budget
//! - [`runtime`]: Frame-rate, time-scale and vsync throttling per phase

pub mod render;
pub mod runtime;

pub use render::{DeviceTexture, MemoryUsage, RenderSource, SyntheticRenderSource};
pub use runtime::{InMemoryRuntime, RuntimeController, RuntimePhase, RuntimeProfile, RuntimeSettings};
