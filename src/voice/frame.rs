//! Fixed-size audio frames shared between the capture path and its consumers

use std::sync::Arc;

/// One block of mono audio, normalized to [-1.0, 1.0]
///
/// Frames are immutable once produced; cloning shares the sample buffer,
/// so the wake gate and the recorder each hold their own view.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    sample_rate: u32,
    sequence: u64,
}

impl AudioFrame {
    /// Create a frame from captured samples
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
        }
    }

    /// Samples in capture order
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate the frame was captured at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Position of this frame in the capture stream
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square amplitude
    #[must_use]
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Convert a normalized sample to 16-bit PCM
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Convert a 16-bit PCM sample to a normalized float
#[must_use]
pub fn from_i16(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}
