//! Pipeline orchestration
//!
//! One session per wake event: pause the gate, record, transcribe, generate a
//! reply, synthesize it, play it, then resume the gate. Empty results end the
//! session early with a [`SessionOutcome`]; stage errors are logged and the
//! pipeline returns to listening.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::Responder;
use crate::voice::{GateControl, Player, Synthesizer, Transcriber, UtteranceSource, WakeEvent};
use crate::{Error, Result};

/// Where the pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Not yet started, or stopped
    #[default]
    Idle,
    /// Waiting for the wake phrase
    Listening,
    /// Capturing the utterance
    Recording,
    /// Speech to text
    Transcribing,
    /// Waiting for the model reply
    Generating,
    /// Text to speech
    Synthesizing,
    /// Speaking the reply
    Playing,
}

impl PipelineState {
    /// Short lowercase name used in logs and timeout errors
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Recording => "recording",
            Self::Transcribing => "transcribing",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Playing => "playing",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// The reply was played
    Completed,
    /// The recorder captured nothing
    NoAudio,
    /// The transcript was empty
    NotUnderstood,
    /// The model produced no reply
    NoResponse,
    /// A stage failed; the session was abandoned
    Failed {
        /// State the pipeline was in when it failed
        stage: PipelineState,
        /// Underlying error
        error: Error,
    },
}

impl SessionOutcome {
    /// Whether the reply was played
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Upper bounds on the engine stages
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub transcribe: Duration,
    pub generate: Duration,
    pub synthesize: Duration,
}

impl From<&Config> for StageTimeouts {
    fn from(config: &Config) -> Self {
        Self {
            transcribe: config.stt.timeout,
            generate: config.llm.timeout,
            synthesize: config.tts.timeout,
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// The engines a session calls, in order
#[derive(Clone)]
pub struct Engines {
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn Responder>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub player: Arc<dyn Player>,
}

/// Pauses the gate on creation and resumes it exactly once on drop
pub struct PauseGuard<'a> {
    gate: &'a dyn GateControl,
}

impl<'a> PauseGuard<'a> {
    /// Pause `gate` until the guard is dropped
    #[must_use]
    pub fn new(gate: &'a dyn GateControl) -> Self {
        gate.pause();
        Self { gate }
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.gate.resume();
    }
}

struct StageError {
    stage: PipelineState,
    error: Error,
}

impl StageError {
    fn at(stage: PipelineState) -> impl FnOnce(Error) -> Self {
        move |error| Self { stage, error }
    }
}

/// Runs one session per wake event
pub struct PipelineOrchestrator {
    gate: Arc<dyn GateControl>,
    recorder: Arc<dyn UtteranceSource>,
    engines: Engines,
    timeouts: StageTimeouts,
    state: watch::Sender<PipelineState>,
}

impl PipelineOrchestrator {
    /// Create an orchestrator in the `Idle` state
    #[must_use]
    pub fn new(
        gate: Arc<dyn GateControl>,
        recorder: Arc<dyn UtteranceSource>,
        engines: Engines,
        timeouts: StageTimeouts,
    ) -> Self {
        Self {
            gate,
            recorder,
            engines,
            timeouts,
            state: watch::Sender::new(PipelineState::Idle),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: PipelineState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "pipeline state");
        }
    }

    /// Handle wake events until `shutdown` flips or the event channel closes
    ///
    /// A session in flight when shutdown arrives is dropped, which resumes the
    /// gate and deletes its staging files.
    pub async fn run(
        &self,
        mut wake_rx: mpsc::Receiver<WakeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.set_state(PipelineState::Listening);
        tracing::info!("listening for wake word");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = wake_rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        tracing::debug!("wake event channel closed");
                        break;
                    }
                },
            };

            tracing::info!(sequence = event.sequence, "wake word heard");

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    tracing::info!("shutdown during session, abandoning it");
                    break;
                }
                outcome = self.run_session() => {
                    tracing::debug!(?outcome, "session finished");
                }
            }

            // Events queued before the gate paused belong to the finished session
            let mut stale = 0usize;
            while wake_rx.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                tracing::debug!(count = stale, "discarded stale wake events");
            }
        }

        self.set_state(PipelineState::Idle);
        tracing::info!("pipeline stopped");
    }

    /// Run one record-to-playback cycle
    ///
    /// The gate is paused for the whole session and resumed on every exit
    /// path, including cancellation.
    pub async fn run_session(&self) -> SessionOutcome {
        let span = tracing::info_span!("session", id = %Uuid::new_v4());

        async {
            let guard = PauseGuard::new(self.gate.as_ref());

            let outcome = match self.drive().await {
                Ok(outcome) => outcome,
                Err(StageError { stage, error }) => {
                    tracing::error!(stage = %stage, error = %error, "session failed");
                    SessionOutcome::Failed { stage, error }
                }
            };

            drop(guard);
            self.set_state(PipelineState::Listening);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn drive(&self) -> std::result::Result<SessionOutcome, StageError> {
        self.set_state(PipelineState::Recording);
        tracing::info!("recording");
        let utterance = self
            .recorder
            .record()
            .await
            .map_err(StageError::at(PipelineState::Recording))?;

        if utterance.is_empty() {
            tracing::info!("no audio captured");
            return Ok(SessionOutcome::NoAudio);
        }

        self.set_state(PipelineState::Transcribing);
        let transcript = {
            let staging = staging_file("dann-utterance-")
                .map_err(StageError::at(PipelineState::Transcribing))?;
            utterance
                .write_wav(staging.path())
                .map_err(StageError::at(PipelineState::Transcribing))?;

            bounded(
                PipelineState::Transcribing,
                self.timeouts.transcribe,
                self.engines.transcriber.transcribe(staging.path()),
            )
            .await?
        };

        let transcript = transcript.trim();
        if transcript.is_empty() {
            tracing::info!("could not understand");
            return Ok(SessionOutcome::NotUnderstood);
        }
        tracing::info!(transcript, "heard");

        self.set_state(PipelineState::Generating);
        let reply = bounded(
            PipelineState::Generating,
            self.timeouts.generate,
            self.engines.responder.respond(transcript),
        )
        .await?;

        let reply = reply.trim();
        if reply.is_empty() {
            tracing::info!("no response");
            return Ok(SessionOutcome::NoResponse);
        }
        tracing::info!(reply, "replying");

        self.set_state(PipelineState::Synthesizing);
        let speech =
            staging_file("dann-reply-").map_err(StageError::at(PipelineState::Synthesizing))?;
        bounded(
            PipelineState::Synthesizing,
            self.timeouts.synthesize,
            self.engines.synthesizer.synthesize(reply, speech.path()),
        )
        .await?;

        self.set_state(PipelineState::Playing);
        self.play(speech.path()).await?;

        tracing::info!("session complete");
        Ok(SessionOutcome::Completed)
    }

    async fn play(&self, path: &Path) -> std::result::Result<(), StageError> {
        self.engines
            .player
            .play(path)
            .await
            .map_err(StageError::at(PipelineState::Playing))
    }
}

/// Scratch WAV file removed when dropped
fn staging_file(prefix: &str) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".wav")
        .tempfile()?)
}

/// Await an engine call under a stage timeout
async fn bounded<T>(
    stage: PipelineState,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> std::result::Result<T, StageError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(StageError::at(stage)),
        Err(_) => Err(StageError {
            stage,
            error: Error::Timeout {
                stage: stage.as_str(),
                limit,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counting {
        pauses: AtomicU32,
        resumes: AtomicU32,
    }

    impl GateControl for Counting {
        fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_pause_guard_resumes_once() {
        let gate = Counting::default();
        {
            let _guard = PauseGuard::new(&gate);
            assert_eq!(gate.pauses.load(Ordering::SeqCst), 1);
            assert_eq!(gate.resumes.load(Ordering::SeqCst), 0);
        }
        assert_eq!(gate.resumes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PipelineState::default(), PipelineState::Idle);
        assert_eq!(PipelineState::Synthesizing.to_string(), "synthesizing");
        assert_eq!(PipelineState::Transcribing.to_string(), "transcribing");
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result = bounded(PipelineState::Generating, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let Err(StageError { stage, error }) = result else {
            panic!("expected timeout");
        };
        assert_eq!(stage, PipelineState::Generating);
        assert!(matches!(error, Error::Timeout { stage: "generating", .. }));
    }
}
