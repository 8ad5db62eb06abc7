// SPDX-License-Identifier: GPL-3.0-only

//! Runtime settings collaborator
//!
//! The host's frame-rate target, simulation time scale and vsync are
//! throttled per recorder phase. While capturing, the host runs sped up
//! with a fixed capture rate so every simulated frame is captured; while
//! flushing, simulated time nearly stops so nothing is missed; once idle,
//! the host gets its original settings back.

use crate::config::Config;
use crate::constants::FLUSH_TIME_SCALE;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Host runtime knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeProfile {
    /// Render frame rate target (0 = unlimited)
    pub target_frame_rate: u32,
    /// Fixed-step capture frame rate (0 = real time)
    pub capture_frame_rate: u32,
    /// Simulation speed multiplier
    pub time_scale: f32,
    /// Vertical sync interval (0 = off)
    pub vsync_count: u32,
}

impl Default for RuntimeProfile {
    fn default() -> Self {
        Self {
            target_frame_rate: 60,
            capture_frame_rate: 0,
            time_scale: 1.0,
            vsync_count: 1,
        }
    }
}

/// Read and write access to the host's runtime settings
pub trait RuntimeSettings: Send + Sync {
    fn current(&self) -> RuntimeProfile;
    fn apply(&self, profile: RuntimeProfile);
}

/// Recorder phase as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimePhase {
    Idle,
    Capturing,
    Flushing,
}

/// Switches the host between phase profiles
pub struct RuntimeController {
    settings: Arc<dyn RuntimeSettings>,
    baseline: RuntimeProfile,
    capturing: RuntimeProfile,
    phase: Mutex<RuntimePhase>,
}

impl RuntimeController {
    /// Snapshot the host's current settings as the idle baseline
    pub fn new(settings: Arc<dyn RuntimeSettings>, config: &Config) -> Self {
        let baseline = settings.current();
        let scaled = config.scaled_framerate();
        let capturing = RuntimeProfile {
            target_frame_rate: scaled,
            capture_frame_rate: scaled,
            time_scale: config.timescale as f32,
            vsync_count: 0,
        };
        Self {
            settings,
            baseline,
            capturing,
            phase: Mutex::new(RuntimePhase::Idle),
        }
    }

    pub fn baseline(&self) -> RuntimeProfile {
        self.baseline
    }

    pub fn phase(&self) -> RuntimePhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enter_capturing(&self) {
        self.switch(RuntimePhase::Capturing, self.capturing);
    }

    pub fn enter_flushing(&self) {
        let profile = RuntimeProfile {
            time_scale: FLUSH_TIME_SCALE,
            vsync_count: 0,
            ..self.baseline
        };
        self.switch(RuntimePhase::Flushing, profile);
    }

    pub fn restore(&self) {
        self.switch(RuntimePhase::Idle, self.baseline);
    }

    fn switch(&self, phase: RuntimePhase, profile: RuntimeProfile) {
        let mut current = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == phase {
            return;
        }
        debug!(from = ?*current, to = ?phase, ?profile, "Applying runtime profile");
        self.settings.apply(profile);
        *current = phase;
    }
}

/// Runtime settings held in memory, with a log of applied profiles
///
/// Stands in for a real host in the CLI and in tests.
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    current: Mutex<RuntimeProfile>,
    applied: Mutex<Vec<RuntimeProfile>>,
}

impl InMemoryRuntime {
    pub fn new(initial: RuntimeProfile) -> Self {
        Self {
            current: Mutex::new(initial),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Every profile applied so far, oldest first
    pub fn applied(&self) -> Vec<RuntimeProfile> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RuntimeSettings for InMemoryRuntime {
    fn current(&self) -> RuntimeProfile {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, profile: RuntimeProfile) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = profile;
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(profile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(config: &Config) -> (Arc<InMemoryRuntime>, RuntimeController) {
        let runtime = Arc::new(InMemoryRuntime::new(RuntimeProfile::default()));
        let controller = RuntimeController::new(runtime.clone(), config);
        (runtime, controller)
    }

    #[test]
    fn test_capturing_profile_scales_frame_rate() {
        let config = Config {
            capture_target_framerate: 30,
            timescale: 4,
            ..Config::default()
        };
        let (runtime, controller) = controller(&config);
        controller.enter_capturing();

        let profile = runtime.current();
        assert_eq!(profile.target_frame_rate, 120);
        assert_eq!(profile.capture_frame_rate, 120);
        assert_eq!(profile.time_scale, 4.0);
        assert_eq!(profile.vsync_count, 0);
        assert_eq!(controller.phase(), RuntimePhase::Capturing);
    }

    #[test]
    fn test_flushing_profile_nearly_stops_time() {
        let (runtime, controller) = controller(&Config::default());
        controller.enter_capturing();
        controller.enter_flushing();

        let profile = runtime.current();
        assert!(profile.time_scale > 0.0 && profile.time_scale < 0.001);
        assert_eq!(profile.target_frame_rate, RuntimeProfile::default().target_frame_rate);
        assert_eq!(profile.vsync_count, 0);
    }

    #[test]
    fn test_restore_returns_to_baseline() {
        let (runtime, controller) = controller(&Config::default());
        controller.enter_capturing();
        controller.restore();
        assert_eq!(runtime.current(), RuntimeProfile::default());
        assert_eq!(runtime.applied().len(), 2);
        assert_eq!(controller.phase(), RuntimePhase::Idle);
    }

    #[test]
    fn test_repeated_phase_is_applied_once() {
        let (runtime, controller) = controller(&Config::default());
        controller.restore();
        assert!(runtime.applied().is_empty());

        controller.enter_flushing();
        controller.enter_flushing();
        assert_eq!(runtime.applied().len(), 1);
    }
}
