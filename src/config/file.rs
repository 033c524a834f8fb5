//! TOML configuration file loading
//!
//! Supports `~/.config/dann/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct DannConfigFile {
    /// Microphone, speaker and recording policy
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Wake word gate
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Speech-to-text engine
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text generation engine
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech synthesis engine
    #[serde(default)]
    pub tts: TtsFileConfig,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub block_ms: Option<u32>,
    pub silence_timeout_ms: Option<u32>,
    pub max_record_ms: Option<u32>,
    /// Linear RMS threshold (0.0 to 1.0)
    pub silence_threshold: Option<f32>,
    /// Substring of the input device name
    pub input_device: Option<String>,
    /// Substring of the output device name
    pub output_device: Option<String>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    /// "rustpotter" or "energy"
    pub engine: Option<String>,
    pub model_path: Option<String>,
    pub sensitivity: Option<f32>,
    pub debounce: Option<u32>,
    pub cooldown_ms: Option<u64>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "command" or "http"
    pub provider: Option<String>,
    pub command: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// LLM configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

/// TTS configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub piper_path: Option<String>,
    pub voice_model: Option<String>,
    pub speed: Option<f32>,
    pub timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `DannConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> DannConfigFile {
    let Some(path) = config_file_path() else {
        return DannConfigFile::default();
    };

    if !path.exists() {
        return DannConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            DannConfigFile::default()
        }
    }
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<DannConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/dann/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("dann").join("config.toml"))
}
