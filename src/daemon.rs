//! Daemon - the voice assistant service
//!
//! Wires capture, the frame dispatcher (wake gate and recorder tap) and the
//! pipeline orchestrator together, and owns shutdown.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::llm::OllamaResponder;
use crate::pipeline::{Engines, PipelineOrchestrator, StageTimeouts};
use crate::voice::{
    AudioFrameSource, AudioPlayback, FrameTap, GatePolicy, PiperSynthesizer, RecordingPolicy,
    UtteranceRecorder, WakeWordGate, build_scorer, build_transcriber, spawn_dispatcher,
};
use crate::{Config, Error, Result};

/// Wake events buffered between the gate and the orchestrator
const WAKE_QUEUE_DEPTH: usize = 4;

/// The Dann daemon - listens, records and answers until interrupted
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Build the speech and language engines
    ///
    /// # Errors
    ///
    /// Returns error if an engine binary, model or device is missing
    pub fn build_engines(&self) -> Result<Engines> {
        Ok(Engines {
            transcriber: Arc::from(build_transcriber(&self.config.stt)?),
            responder: Arc::new(OllamaResponder::new(&self.config.llm)?),
            synthesizer: Arc::new(PiperSynthesizer::new(&self.config.tts)?),
            player: Arc::new(AudioPlayback::new(self.config.audio.output_device.clone())?),
        })
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if startup fails or the audio pipeline ends without an
    /// interrupt; per-session errors are handled by the pipeline
    pub async fn run(self) -> Result<()> {
        let audio = &self.config.audio;

        // Engines first so a bad install fails before the microphone opens
        let engines = self.build_engines()?;
        let scorer = build_scorer(&self.config.wake_word, audio.sample_rate)?;

        let (wake_tx, wake_rx) = mpsc::channel(WAKE_QUEUE_DEPTH);
        let gate = WakeWordGate::new(scorer, GatePolicy::from(&self.config.wake_word), wake_tx);
        let gate_handle = gate.handle();

        let tap = FrameTap::default();
        let recorder = UtteranceRecorder::new(
            tap.clone(),
            RecordingPolicy::from_audio(audio),
            audio.sample_rate,
        );

        let (mut source, frames) = AudioFrameSource::open(audio)?;
        let dispatcher = spawn_dispatcher(frames, gate, tap)?;

        let orchestrator = Arc::new(PipelineOrchestrator::new(
            Arc::new(gate_handle),
            Arc::new(recorder),
            engines,
            StageTimeouts::from(&self.config),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut pipeline = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.run(wake_rx, shutdown_rx).await }
        });

        tracing::info!(
            device = source.device_name(),
            engine = ?self.config.wake_word.engine,
            "dann ready"
        );

        let interrupted = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("interrupt received, shutting down");
                true
            }
            result = &mut pipeline => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "pipeline task failed");
                }
                tracing::error!("pipeline stopped unexpectedly");
                false
            }
        };

        // Ignore send failure: the pipeline may already be gone
        let _ = shutdown_tx.send(true);
        if !pipeline.is_finished() {
            if let Err(e) = pipeline.await {
                tracing::error!(error = %e, "pipeline task failed");
            }
        }

        // Stopping capture closes the frame channel, which ends the dispatcher
        source.stop();
        tokio::task::spawn_blocking(move || dispatcher.join())
            .await
            .map_err(|e| Error::Audio(format!("dispatcher join failed: {e}")))?
            .map_err(|_| Error::Audio("frame dispatcher panicked".to_string()))?;

        if !interrupted {
            // The wake channel only closes when the dispatcher has died
            return Err(Error::Audio("audio pipeline stopped unexpectedly".to_string()));
        }

        tracing::info!("daemon stopped");
        Ok(())
    }
}
