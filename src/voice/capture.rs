//! Audio capture from microphone
//!
//! A dedicated thread owns the cpal input stream (streams are not `Send`),
//! assembles device callbacks into fixed-size mono frames and publishes them
//! over a bounded channel. Dropping the source stops the thread and releases
//! the device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig};
use tokio::sync::mpsc;

use super::frame::AudioFrame;
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Frames buffered between the capture thread and the dispatcher
pub const FRAME_QUEUE_DEPTH: usize = 64;

/// How often the capture thread checks for shutdown
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Microphone frame producer
pub struct AudioFrameSource {
    device_name: String,
    sample_rate: u32,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioFrameSource {
    /// Open the configured input device and start capturing
    ///
    /// Returns the source and the receiving end of its frame channel.
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if no suitable input device can be opened
    pub fn open(audio: &AudioConfig) -> Result<(Self, mpsc::Receiver<AudioFrame>)> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<String>>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_config = audio.clone();
        let thread_shutdown = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                capture_thread(&thread_config, frame_tx, &thread_shutdown, &ready_tx);
            })?;

        let device_name = ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        tracing::info!(
            device = %device_name,
            sample_rate = audio.sample_rate,
            channels = audio.channels,
            block_ms = audio.block_ms,
            "audio capture started"
        );

        Ok((
            Self {
                device_name,
                sample_rate: audio.sample_rate,
                shutdown,
                thread: Some(thread),
            },
            frame_rx,
        ))
    }

    /// Name of the capture device
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Capture sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop capturing and release the device
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("audio capture thread panicked");
            }
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Drop for AudioFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the capture thread
fn capture_thread(
    audio: &AudioConfig,
    frames: mpsc::Sender<AudioFrame>,
    shutdown: &AtomicBool,
    ready: &std::sync::mpsc::Sender<Result<String>>,
) {
    let stream = match open_input_stream(audio, frames.clone()) {
        Ok((stream, name)) => {
            let _ = ready.send(Ok(name));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while !shutdown.load(Ordering::SeqCst) && !frames.is_closed() {
        std::thread::sleep(SHUTDOWN_POLL);
    }

    drop(stream);
}

/// Open the input device and start a stream feeding `frames`
fn open_input_stream(
    audio: &AudioConfig,
    frames: mpsc::Sender<AudioFrame>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = find_input_device(&host, audio.input_device.as_deref())?;
    let name = device.name().unwrap_or_default();

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == audio.channels
                && c.min_sample_rate() <= SampleRate(audio.sample_rate)
                && c.max_sample_rate() >= SampleRate(audio.sample_rate)
        })
        .ok_or_else(|| {
            Error::Audio(format!(
                "{name}: no input config with {} channel(s) at {} Hz",
                audio.channels, audio.sample_rate
            ))
        })?
        .with_sample_rate(SampleRate(audio.sample_rate));

    let format = supported.sample_format();
    let config = supported.config();
    let assembler = FrameAssembler::new(audio);

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, assembler, frames)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, assembler, frames)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, assembler, frames)?,
        other => {
            return Err(Error::Audio(format!("unsupported sample format: {other:?}")));
        }
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, name))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut assembler: FrameAssembler,
    frames: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
                for frame in assembler.push(&scratch) {
                    publish(&frames, frame);
                }
            },
            |err| {
                tracing::warn!(error = %err, "audio capture stream error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Hand a frame to the dispatcher without blocking the device callback
fn publish(frames: &mpsc::Sender<AudioFrame>, frame: AudioFrame) {
    match frames.try_send(frame) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(frame)) => {
            tracing::warn!(sequence = frame.sequence(), "frame queue full, dropping frame");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

/// Find an input device whose name contains `filter`, or the default one
fn find_input_device(host: &cpal::Host, filter: Option<&str>) -> Result<Device> {
    match filter {
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string())),
        Some(filter) => {
            let needle = filter.to_lowercase();
            host.input_devices()
                .map_err(|e| Error::Audio(e.to_string()))?
                .find(|d| {
                    d.name()
                        .is_ok_and(|name| name.to_lowercase().contains(&needle))
                })
                .ok_or_else(|| Error::Audio(format!("no input device matching '{filter}'")))
        }
    }
}

/// Assembles interleaved device callbacks into fixed-size mono frames
#[derive(Debug)]
pub struct FrameAssembler {
    block_samples: usize,
    channels: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    /// Create an assembler for the configured block size
    #[must_use]
    pub fn new(audio: &AudioConfig) -> Self {
        let block_samples = audio.block_samples().max(1);
        Self {
            block_samples,
            channels: usize::from(audio.channels.max(1)),
            sample_rate: audio.sample_rate,
            pending: Vec::with_capacity(block_samples * 2),
            next_sequence: 0,
        }
    }

    /// Push interleaved samples, returning every frame completed by them
    #[allow(clippy::cast_precision_loss)]
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<AudioFrame> {
        if self.channels == 1 {
            self.pending.extend_from_slice(interleaved);
        } else {
            let scale = 1.0 / self.channels as f32;
            self.pending.extend(
                interleaved
                    .chunks_exact(self.channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale),
            );
        }

        let mut ready = Vec::new();
        while self.pending.len() >= self.block_samples {
            let rest = self.pending.split_off(self.block_samples);
            let block = std::mem::replace(&mut self.pending, rest);
            ready.push(AudioFrame::new(block, self.sample_rate, self.next_sequence));
            self.next_sequence += 1;
        }
        ready
    }
}
