//! Error types for the Dann voice pipeline

use std::time::Duration;

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error (capture or playback device unavailable)
    #[error("audio error: {0}")]
    Audio(String),

    /// Wake word scoring error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text generation error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// An engine call exceeded its deadline
    #[error("{stage} timed out after {limit:?}")]
    Timeout {
        /// Stage that timed out
        stage: &'static str,
        /// Deadline that expired
        limit: Duration,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WAV encoding or decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
