//! Wake word detection
//!
//! The gate scores each captured frame with a [`WakeWordScorer`] and turns
//! raw hits into wake events under a debounce and cooldown policy. The
//! orchestrator pauses and resumes the gate through a [`GateHandle`] while a
//! session is in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::frame::{AudioFrame, rms};
use crate::config::WakeWordConfig;
use crate::{Error, Result};

/// Scores fixed-size audio frames for the wake phrase
///
/// Implementations may buffer audio internally across calls.
pub trait WakeWordScorer: Send {
    /// Return whether this frame (with any retained state) contains the wake phrase
    ///
    /// # Errors
    ///
    /// Returns error if the model fails to score the frame
    fn score(&mut self, samples: &[f32]) -> Result<bool>;

    /// Discard internal streaming state
    fn reset(&mut self) {}
}

/// Emitted when the wake phrase is confirmed
#[derive(Debug, Clone, Copy)]
pub struct WakeEvent {
    /// Sequence number of the frame that completed the debounce
    pub sequence: u64,
    /// When the event fired
    pub at: Instant,
}

/// Debounce and cooldown policy
#[derive(Debug, Clone, Copy)]
pub struct GatePolicy {
    /// Consecutive hit frames required to fire
    pub debounce: u32,
    /// Minimum time between two events
    pub cooldown: Duration,
}

impl From<&WakeWordConfig> for GatePolicy {
    fn from(config: &WakeWordConfig) -> Self {
        Self {
            debounce: config.debounce.max(1),
            cooldown: config.cooldown,
        }
    }
}

/// Mutable gate state shared between the capture side and the control handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateState {
    /// Length of the current run of hit frames
    pub consecutive_hits: u32,
    /// When the last event fired
    pub last_trigger: Option<Instant>,
    /// Whether scoring is suspended
    pub paused: bool,
    scorer_stale: bool,
}

/// Pause/resume control over a running gate
pub trait GateControl: Send + Sync {
    /// Suspend scoring; idempotent
    fn pause(&self);

    /// Resume scoring with a fresh hit streak; idempotent
    fn resume(&self);
}

/// Cloneable handle to a gate's state
#[derive(Debug, Clone, Default)]
pub struct GateHandle {
    state: Arc<Mutex<GateState>>,
}

impl GateHandle {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> GateState {
        *self.lock()
    }

    /// Whether scoring is suspended
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }
}

impl GateControl for GateHandle {
    fn pause(&self) {
        let mut state = self.lock();
        if !state.paused {
            state.paused = true;
            tracing::debug!("wake word gate paused");
        }
    }

    fn resume(&self) {
        let mut state = self.lock();
        if state.paused {
            state.paused = false;
            state.consecutive_hits = 0;
            state.scorer_stale = true;
            tracing::debug!("wake word gate resumed");
        }
    }
}

/// Streaming wake word gate
pub struct WakeWordGate {
    scorer: Box<dyn WakeWordScorer>,
    policy: GatePolicy,
    handle: GateHandle,
    events: mpsc::Sender<WakeEvent>,
}

impl WakeWordGate {
    /// Create a gate delivering events to `events`
    #[must_use]
    pub fn new(
        scorer: Box<dyn WakeWordScorer>,
        policy: GatePolicy,
        events: mpsc::Sender<WakeEvent>,
    ) -> Self {
        tracing::debug!(
            debounce = policy.debounce,
            cooldown_ms = policy.cooldown.as_millis(),
            "wake word gate initialized"
        );

        Self {
            scorer,
            policy,
            handle: GateHandle::default(),
            events,
        }
    }

    /// Handle for pausing and resuming this gate from another task
    #[must_use]
    pub fn handle(&self) -> GateHandle {
        self.handle.clone()
    }

    /// Process one frame, returning whether it scored as a hit
    pub fn process(&mut self, frame: &AudioFrame) -> bool {
        self.process_at(frame, Instant::now())
    }

    /// Process one frame observed at `now`
    ///
    /// Paused gates skip scoring and leave their state untouched.
    pub fn process_at(&mut self, frame: &AudioFrame, now: Instant) -> bool {
        let mut state = self.handle.lock();
        if state.paused {
            return false;
        }

        if state.scorer_stale {
            self.scorer.reset();
            state.scorer_stale = false;
        }

        let hit = match self.scorer.score(frame.samples()) {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence(), "wake word scoring failed");
                false
            }
        };

        if !hit {
            state.consecutive_hits = 0;
            return false;
        }

        state.consecutive_hits = state.consecutive_hits.saturating_add(1);

        let cooled = state
            .last_trigger
            .is_none_or(|last| now.saturating_duration_since(last) >= self.policy.cooldown);

        if state.consecutive_hits >= self.policy.debounce && cooled {
            state.consecutive_hits = 0;
            state.last_trigger = Some(now);
            drop(state);

            tracing::info!(sequence = frame.sequence(), "wake word detected");
            let event = WakeEvent {
                sequence: frame.sequence(),
                at: now,
            };
            if let Err(e) = self.events.try_send(event) {
                tracing::warn!(error = %e, "wake event not delivered");
            }
        }

        true
    }
}

/// Energy-threshold scorer
///
/// Treats any sufficiently loud frame as a hit. Useful for checking the
/// microphone path without a trained model.
#[derive(Debug, Clone)]
pub struct EnergyScorer {
    threshold: f32,
}

impl EnergyScorer {
    /// Create a scorer; higher sensitivity lowers the RMS threshold
    #[must_use]
    pub fn new(sensitivity: f32) -> Self {
        let sensitivity = sensitivity.clamp(0.0, 1.0);
        Self {
            threshold: 0.02 + (1.0 - sensitivity) * 0.2,
        }
    }

    /// RMS level at or above which a frame is a hit
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl WakeWordScorer for EnergyScorer {
    fn score(&mut self, samples: &[f32]) -> Result<bool> {
        Ok(rms(samples) >= self.threshold)
    }
}

#[cfg(feature = "wake-word")]
pub use self::rustpotter_scorer::RustpotterScorer;

#[cfg(feature = "wake-word")]
mod rustpotter_scorer {
    use std::path::Path;

    use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};

    use super::WakeWordScorer;
    use crate::{Error, Result};

    /// Rustpotter model scorer
    ///
    /// Captured frames are re-chunked to the model's own frame size; a frame
    /// is a hit if any model frame completed by it produced a detection.
    pub struct RustpotterScorer {
        detector: Rustpotter,
        model_frame: usize,
        pending: Vec<f32>,
    }

    impl RustpotterScorer {
        /// Load a wake word model
        ///
        /// # Errors
        ///
        /// Returns `Error::Config` if the model cannot be loaded
        pub fn new(model_path: &Path, sample_rate: u32, sensitivity: f32) -> Result<Self> {
            let mut config = RustpotterConfig::default();
            config.fmt.sample_rate = sample_rate as usize;
            config.fmt.channels = 1;
            config.fmt.sample_format = SampleFormat::F32;
            config.detector.threshold = sensitivity;

            let mut detector = Rustpotter::new(&config)
                .map_err(|e| Error::Config(format!("rustpotter init failed: {e}")))?;
            let path = model_path.to_string_lossy();
            detector
                .add_wakeword_from_file("wake", &path)
                .map_err(|e| Error::Config(format!("failed to load wake word model {path}: {e}")))?;

            let model_frame = detector.get_samples_per_frame();
            tracing::info!(model = %path, model_frame, "wake word model loaded");

            Ok(Self {
                detector,
                model_frame,
                pending: Vec::with_capacity(model_frame * 2),
            })
        }
    }

    impl WakeWordScorer for RustpotterScorer {
        fn score(&mut self, samples: &[f32]) -> Result<bool> {
            if self.model_frame == 0 {
                return Err(Error::WakeWord("model reports empty frame size".to_string()));
            }

            self.pending.extend_from_slice(samples);
            let mut detected = false;
            while self.pending.len() >= self.model_frame {
                let rest = self.pending.split_off(self.model_frame);
                let chunk = std::mem::replace(&mut self.pending, rest);
                if let Some(detection) = self.detector.process_samples(chunk) {
                    tracing::debug!(score = detection.score, "rustpotter detection");
                    detected = true;
                }
            }
            Ok(detected)
        }

        fn reset(&mut self) {
            self.pending.clear();
        }
    }
}

/// Build the scorer selected by configuration
///
/// # Errors
///
/// Returns `Error::Config` if the selected engine is unavailable or its model fails to load
pub fn build_scorer(config: &WakeWordConfig, sample_rate: u32) -> Result<Box<dyn WakeWordScorer>> {
    use crate::config::WakeEngine;

    match config.engine {
        WakeEngine::Energy => Ok(Box::new(EnergyScorer::new(config.sensitivity))),
        #[cfg(feature = "wake-word")]
        WakeEngine::Rustpotter => {
            let path = config.model_path.as_deref().ok_or_else(|| {
                Error::Config("wake_word.model_path required for the rustpotter engine".to_string())
            })?;
            Ok(Box::new(RustpotterScorer::new(
                path,
                sample_rate,
                config.sensitivity,
            )?))
        }
        #[cfg(not(feature = "wake-word"))]
        WakeEngine::Rustpotter => {
            let _ = sample_rate;
            Err(Error::Config(
                "built without the 'wake-word' feature; use wake_word.engine = \"energy\""
                    .to_string(),
            ))
        }
    }
}
