//! Utterance capture
//!
//! Records from the frame tap until sustained silence or the duration cap,
//! counting both at block granularity.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::dispatch::FrameTap;
use super::frame::{AudioFrame, to_i16};
use crate::Result;
use crate::config::AudioConfig;

/// Blocks without any frame before a recording is abandoned
const STALL_BLOCKS: u32 = 10;

/// When a recording ends
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingPolicy {
    /// RMS below which a block counts as silent
    pub silence_threshold: f32,
    /// Consecutive silent blocks that end the utterance
    pub silence_blocks: u32,
    /// Total blocks after which recording stops
    pub max_blocks: u32,
    /// Duration of one block
    pub block: Duration,
}

impl RecordingPolicy {
    /// Derive the policy from audio configuration
    #[must_use]
    pub fn from_audio(audio: &AudioConfig) -> Self {
        let block_ms = audio.block_ms.max(1);
        Self {
            silence_threshold: audio.silence_threshold,
            silence_blocks: audio.silence_timeout_ms.div_ceil(block_ms).max(1),
            max_blocks: audio.max_record_ms.div_ceil(block_ms).max(1),
            block: Duration::from_millis(u64::from(block_ms)),
        }
    }
}

/// Frames collected during one recording session
#[derive(Debug, Default)]
pub struct UtteranceBuffer {
    frames: Vec<AudioFrame>,
}

impl UtteranceBuffer {
    /// Append a frame
    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }

    /// Number of frames collected
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame was collected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Concatenate the frames into 16-bit PCM
    #[must_use]
    pub fn into_utterance(self, sample_rate: u32) -> Utterance {
        let samples = self
            .frames
            .iter()
            .flat_map(|f| f.samples().iter().copied().map(to_i16))
            .collect();

        Utterance {
            samples,
            sample_rate,
            blocks: self.frames.len(),
        }
    }
}

/// A finished, mono 16-bit recording
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Utterance {
    samples: Vec<i16>,
    sample_rate: u32,
    blocks: usize,
}

impl Utterance {
    /// Wrap existing PCM samples
    #[must_use]
    pub const fn from_pcm(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            blocks: 0,
        }
    }

    /// PCM samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of captured blocks
    #[must_use]
    pub const fn blocks(&self) -> usize {
        self.blocks
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Audio duration
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Little-endian raw PCM bytes
    #[must_use]
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    /// Write a mono 16-bit WAV file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let mut writer = hound::WavWriter::create(path, self.wav_spec())?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// Something that can capture one utterance on demand
#[async_trait]
pub trait UtteranceSource: Send + Sync {
    /// Record one utterance starting now
    ///
    /// An empty utterance means nothing was captured.
    ///
    /// # Errors
    ///
    /// Returns error if recording cannot start
    async fn record(&self) -> Result<Utterance>;
}

/// Records utterances from the live frame tap
#[derive(Debug, Clone)]
pub struct UtteranceRecorder {
    tap: FrameTap,
    policy: RecordingPolicy,
    sample_rate: u32,
}

impl UtteranceRecorder {
    /// Create a recorder reading from `tap`
    #[must_use]
    pub const fn new(tap: FrameTap, policy: RecordingPolicy, sample_rate: u32) -> Self {
        Self {
            tap,
            policy,
            sample_rate,
        }
    }

    /// Recording policy in effect
    #[must_use]
    pub const fn policy(&self) -> &RecordingPolicy {
        &self.policy
    }

    /// Record from an explicit frame stream
    ///
    /// Stops on sustained silence, on the block cap, or when the stream
    /// closes or stalls.
    pub async fn record_from(&self, frames: &mut mpsc::Receiver<AudioFrame>) -> Utterance {
        let policy = &self.policy;
        let stall = policy.block * STALL_BLOCKS;
        let mut buffer = UtteranceBuffer::default();
        let mut silent_blocks = 0u32;

        loop {
            let frame = match tokio::time::timeout(stall, frames.recv()).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::warn!(blocks = buffer.len(), "frame stream closed during recording");
                    break;
                }
                Err(_) => {
                    tracing::warn!(
                        blocks = buffer.len(),
                        "no audio frames arriving, ending recording"
                    );
                    break;
                }
            };

            if frame.rms() < policy.silence_threshold {
                silent_blocks += 1;
            } else {
                silent_blocks = 0;
            }
            buffer.push(frame);

            if silent_blocks >= policy.silence_blocks {
                tracing::debug!(blocks = buffer.len(), "silence detected, recording complete");
                break;
            }
            if buffer.len() >= policy.max_blocks as usize {
                tracing::debug!(blocks = buffer.len(), "maximum recording length reached");
                break;
            }
        }

        buffer.into_utterance(self.sample_rate)
    }
}

#[async_trait]
impl UtteranceSource for UtteranceRecorder {
    async fn record(&self) -> Result<Utterance> {
        let mut frames = self.tap.subscribe(self.policy.max_blocks as usize + 1);
        let utterance = self.record_from(&mut frames).await;
        drop(frames);

        tracing::info!(
            blocks = utterance.blocks(),
            duration_ms = utterance.duration().as_millis(),
            "utterance recorded"
        );
        Ok(utterance)
    }
}
