//! Dann - a local voice assistant pipeline
//!
//! This library provides the core functionality for the Dann daemon:
//! - Audio capture and wake word gating (debounce, cooldown, pause/resume)
//! - Utterance recording with energy-based end-of-speech detection
//! - A pipeline orchestrator driving STT, a local LLM, TTS and playback
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Capture thread (cpal)                  │
//! │        fixed-size mono frames, bounded queue        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Frame dispatcher                     │
//! │     Wake word gate   │   Recorder tap (on demand)   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ wake event
//! ┌────────────────────▼────────────────────────────────┐
//! │              Pipeline orchestrator                  │
//! │   Record │ Whisper │ Ollama │ Piper │ Playback      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use pipeline::{PipelineOrchestrator, PipelineState, SessionOutcome};
