//! Shared test utilities
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dann_voice::llm::Responder;
use dann_voice::pipeline::{Engines, PipelineOrchestrator, StageTimeouts};
use dann_voice::voice::{
    AudioFrame, GateControl, Player, Synthesizer, Transcriber, Utterance, UtteranceSource,
};
use dann_voice::{Error, Result};

/// Capture rate used throughout the tests
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples in one 100 ms block
pub const BLOCK_SAMPLES: usize = 1600;

/// A block of a 440 Hz tone
#[allow(clippy::cast_precision_loss)]
pub fn tone_frame(sequence: u64, amplitude: f32) -> AudioFrame {
    let samples = (0..BLOCK_SAMPLES)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();
    AudioFrame::new(samples, SAMPLE_RATE, sequence)
}

/// A block of digital silence
pub fn silent_frame(sequence: u64) -> AudioFrame {
    AudioFrame::new(vec![0.0; BLOCK_SAMPLES], SAMPLE_RATE, sequence)
}

/// A short non-empty utterance
pub fn spoken_utterance() -> Utterance {
    Utterance::from_pcm(vec![1000; BLOCK_SAMPLES * 5], SAMPLE_RATE)
}

/// Gate control that counts calls
#[derive(Default)]
pub struct CountingGate {
    pauses: AtomicU32,
    resumes: AtomicU32,
}

impl CountingGate {
    pub fn pauses(&self) -> u32 {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> u32 {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl GateControl for CountingGate {
    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Recorder returning a fixed utterance
pub struct MockRecorder {
    utterance: Utterance,
    calls: AtomicU32,
}

impl MockRecorder {
    pub fn new(utterance: Utterance) -> Self {
        Self {
            utterance,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UtteranceSource for MockRecorder {
    async fn record(&self) -> Result<Utterance> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.utterance.clone())
    }
}

/// Transcriber returning fixed text, or failing
pub struct MockTranscriber {
    text: Option<String>,
    calls: AtomicU32,
    seen: Mutex<Option<(PathBuf, u64)>>,
}

impl MockTranscriber {
    pub fn replying(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            calls: AtomicU32::new(0),
            seen: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: None,
            calls: AtomicU32::new(0),
            seen: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Path and size of the staging file at call time
    pub fn seen(&self) -> Option<(PathBuf, u64)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, wav: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let size = std::fs::metadata(wav).map(|m| m.len()).unwrap_or(0);
        *self.seen.lock().unwrap() = Some((wav.to_path_buf(), size));

        self.text
            .clone()
            .ok_or_else(|| Error::Stt("whisper exited with status 1".to_string()))
    }
}

/// Responder returning a fixed reply after an optional delay
pub struct MockResponder {
    reply: String,
    delay: Duration,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl MockResponder {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(reply: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::replying(reply)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Responder for MockResponder {
    async fn respond(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

/// Synthesizer writing a short tone WAV
#[derive(Default)]
pub struct MockSynthesizer {
    calls: AtomicU32,
    paths: Mutex<Vec<PathBuf>>,
}

impl MockSynthesizer {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, _text: &str, out: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(out.to_path_buf());
        Utterance::from_pcm(vec![500; 2205], 22_050).write_wav(out)
    }
}

/// Player that records what it was asked to play
#[derive(Default)]
pub struct MockPlayer {
    calls: AtomicU32,
    played: Mutex<Vec<(PathBuf, bool)>>,
    device_lost: bool,
}

impl MockPlayer {
    /// Player whose output device has gone away
    pub fn device_lost() -> Self {
        Self {
            device_lost: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Paths played and whether each existed at play time
    pub fn played(&self) -> Vec<(PathBuf, bool)> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl Player for MockPlayer {
    async fn play(&self, path: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.played
            .lock()
            .unwrap()
            .push((path.to_path_buf(), path.is_file()));
        if self.device_lost {
            return Err(Error::Audio("output device disconnected".to_string()));
        }
        Ok(())
    }
}

/// Mocks wired into an orchestrator, kept for inspection
pub struct Harness {
    pub gate: Arc<CountingGate>,
    pub recorder: Arc<MockRecorder>,
    pub transcriber: Arc<MockTranscriber>,
    pub responder: Arc<MockResponder>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub player: Arc<MockPlayer>,
}

impl Harness {
    pub fn new(
        utterance: Utterance,
        transcriber: MockTranscriber,
        responder: MockResponder,
    ) -> Self {
        Self {
            gate: Arc::new(CountingGate::default()),
            recorder: Arc::new(MockRecorder::new(utterance)),
            transcriber: Arc::new(transcriber),
            responder: Arc::new(responder),
            synthesizer: Arc::new(MockSynthesizer::default()),
            player: Arc::new(MockPlayer::default()),
        }
    }

    /// Happy path mocks
    pub fn conversational() -> Self {
        Self::new(
            spoken_utterance(),
            MockTranscriber::replying(" What time is it? "),
            MockResponder::replying("It is noon."),
        )
    }

    pub fn with_player(mut self, player: MockPlayer) -> Self {
        self.player = Arc::new(player);
        self
    }

    pub fn orchestrator(&self, timeouts: StageTimeouts) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            self.gate.clone(),
            self.recorder.clone(),
            Engines {
                transcriber: self.transcriber.clone(),
                responder: self.responder.clone(),
                synthesizer: self.synthesizer.clone(),
                player: self.player.clone(),
            },
            timeouts,
        )
    }
}
