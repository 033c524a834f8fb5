//! Voice processing module
//!
//! Handles audio capture, wake word gating, utterance recording, and the
//! speech engines (STT, TTS, playback) used by the pipeline.

mod capture;
mod dispatch;
mod frame;
mod playback;
mod recorder;
mod stt;
mod tts;
mod wake_word;

pub use capture::{AudioFrameSource, FRAME_QUEUE_DEPTH, FrameAssembler};
pub use dispatch::{FrameTap, dispatch_frames, spawn_dispatcher};
pub use frame::{AudioFrame, from_i16, rms, to_i16};
pub use playback::{AudioPlayback, Player, read_wav_mono, resample_audio};
pub use recorder::{RecordingPolicy, Utterance, UtteranceBuffer, UtteranceRecorder, UtteranceSource};
pub use stt::{Transcriber, WhisperCommand, WhisperHttp, build_transcriber};
pub use tts::{PiperSynthesizer, Synthesizer, resolve_voice_model};
#[cfg(feature = "wake-word")]
pub use wake_word::RustpotterScorer;
pub use wake_word::{
    EnergyScorer, GateControl, GateHandle, GatePolicy, GateState, WakeEvent, WakeWordGate,
    WakeWordScorer, build_scorer,
};
