//! Audio playback to speakers

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};

use super::frame::from_i16;
use crate::{Error, Result};

/// Plays an audio file, returning once it has finished
#[async_trait]
pub trait Player: Send + Sync {
    /// Play the WAV file at `path` to completion
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be decoded or played
    async fn play(&self, path: &Path) -> Result<()>;
}

/// Plays WAV files on the configured output device
#[derive(Debug, Clone)]
pub struct AudioPlayback {
    output_device: Option<String>,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be found
    pub fn new(output_device: Option<String>) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_output_device(&host, output_device.as_deref())?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self { output_device })
    }

    /// Decode and play a WAV file, blocking until done
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub fn play_file_blocking(&self, path: &Path) -> Result<()> {
        let (samples, sample_rate) = read_wav_mono(path)?;
        self.play_samples_blocking(samples, sample_rate)
    }

    /// Play mono samples in a blocking manner
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub fn play_samples_blocking(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = find_output_device(&host, self.output_device.as_deref())
            .map_err(|e| Error::Playback(e.to_string()))?;

        let (config, samples) = match native_config(&device, sample_rate) {
            Some(config) => (config, samples),
            None => {
                let default = device
                    .default_output_config()
                    .map_err(|e| Error::Playback(e.to_string()))?;
                if default.sample_format() != SampleFormat::F32 {
                    return Err(Error::Playback(format!(
                        "unsupported output sample format: {:?}",
                        default.sample_format()
                    )));
                }
                let config = default.config();
                tracing::debug!(
                    from = sample_rate,
                    to = config.sample_rate.0,
                    "resampling for playback"
                );
                let resampled = resample_audio(&samples, sample_rate, config.sample_rate.0)?;
                (config, resampled)
            }
        };

        let channels = usize::from(config.channels);
        let output_rate = config.sample_rate.0;
        let sample_count = samples.len();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_flag = Arc::clone(&finished);
        let mut position = 0usize;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(position).copied().unwrap_or_else(|| {
                            finished_flag.store(true, Ordering::Release);
                            0.0
                        });
                        frame.fill(sample);
                        position = position.saturating_add(1);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?;

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        // Wait for playback to finish
        let duration_ms = (sample_count as u64 * 1000) / u64::from(output_rate.max(1));
        let start = Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        while !finished.load(Ordering::Acquire) {
            if start.elapsed() > timeout {
                tracing::warn!("playback did not report completion, stopping");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");

        Ok(())
    }
}

#[async_trait]
impl Player for AudioPlayback {
    async fn play(&self, path: &Path) -> Result<()> {
        let player = self.clone();
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || player.play_file_blocking(&path))
            .await
            .map_err(|e| Error::Playback(format!("playback task failed: {e}")))?
    }
}

/// Output config playing `sample_rate` directly, if the device supports it
fn native_config(device: &Device, sample_rate: u32) -> Option<StreamConfig> {
    let configs: Vec<_> = device.supported_output_configs().ok()?.collect();
    let supports = |channels: u16| {
        configs.iter().find(|c| {
            c.channels() == channels
                && c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
    };

    // Fallback: try stereo
    supports(1)
        .or_else(|| supports(2))
        .map(|c| c.clone().with_sample_rate(SampleRate(sample_rate)).config())
}

/// Find an output device whose name contains `filter`, or the default one
fn find_output_device(host: &cpal::Host, filter: Option<&str>) -> Result<Device> {
    match filter {
        None => host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string())),
        Some(filter) => {
            let needle = filter.to_lowercase();
            host.output_devices()
                .map_err(|e| Error::Audio(e.to_string()))?
                .find(|d| {
                    d.name()
                        .is_ok_and(|name| name.to_lowercase().contains(&needle))
                })
                .ok_or_else(|| Error::Audio(format!("no output device matching '{filter}'")))
        }
    }
}

/// Decode a WAV file to mono f32 samples
///
/// # Errors
///
/// Returns error if the file is missing or not a supported WAV
#[allow(clippy::cast_precision_loss)]
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(from_i16))
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, bits) => {
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        let scale = 1.0 / channels as f32;
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

/// Resample audio using rubato
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, 1024, 2, 1)
        .map_err(|e| Error::Playback(format!("resampler init failed: {e}")))?;
    let chunk_size = resampler.input_frames_next();

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::with_capacity(samples.len() * to_rate as usize / from_rate as usize + 1);

    for chunk in input.chunks(chunk_size) {
        // Zero-pad the tail so no input is dropped
        let mut block = chunk.to_vec();
        block.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Playback(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
    output.truncate(expected);

    Ok(output.iter().map(|&s| s as f32).collect())
}
