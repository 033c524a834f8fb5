//! Configuration management for the Dann voice pipeline
//!
//! Configuration is loaded once at startup (defaults, then the TOML overlay,
//! then environment overrides) and is read-only afterwards.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use self::file::DannConfigFile;
use crate::{Error, Result};

/// Default system preamble for the responder
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a concise voice assistant. Keep responses brief.";

/// Dann configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Audio capture, playback and recording policy
    pub audio: AudioConfig,

    /// Wake word gate
    pub wake_word: WakeWordConfig,

    /// Speech-to-text engine
    pub stt: SttConfig,

    /// Text generation engine
    pub llm: LlmConfig,

    /// Speech synthesis engine
    pub tts: TtsConfig,
}

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Capture channel count (frames are downmixed to mono)
    pub channels: u16,

    /// Duration of one frame in milliseconds
    pub block_ms: u32,

    /// Sustained silence that ends an utterance
    pub silence_timeout_ms: u32,

    /// Hard cap on utterance length
    pub max_record_ms: u32,

    /// Linear RMS amplitude below which a frame counts as silent
    pub silence_threshold: f32,

    /// Input device name filter (default device when absent)
    pub input_device: Option<String>,

    /// Output device name filter (default device when absent)
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            block_ms: 100,
            silence_timeout_ms: 1500,
            max_record_ms: 15_000,
            silence_threshold: 0.01,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Number of mono samples in one frame
    #[must_use]
    pub const fn block_samples(&self) -> usize {
        (self.sample_rate as usize * self.block_ms as usize) / 1000
    }

    /// Wall-clock duration of one frame
    #[must_use]
    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.block_ms))
    }
}

/// Wake word scorer backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakeEngine {
    /// Rustpotter model file (`.rpw`)
    #[default]
    Rustpotter,
    /// RMS energy threshold, for hardware bring-up
    Energy,
}

impl std::str::FromStr for WakeEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rustpotter" => Ok(Self::Rustpotter),
            "energy" => Ok(Self::Energy),
            other => Err(Error::Config(format!("unknown wake word engine: {other}"))),
        }
    }
}

/// Wake word configuration
#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    /// Scorer backend
    pub engine: WakeEngine,

    /// Path to the wake word model
    pub model_path: Option<PathBuf>,

    /// Detection sensitivity (0.0 to 1.0)
    pub sensitivity: f32,

    /// Consecutive hit frames required to fire
    pub debounce: u32,

    /// Minimum time between two wake events
    pub cooldown: Duration,
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            engine: WakeEngine::Rustpotter,
            model_path: None,
            sensitivity: 0.5,
            debounce: 2,
            cooldown: Duration::from_millis(2000),
        }
    }
}

/// Speech-to-text backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProvider {
    /// Local whisper.cpp-style command line tool
    #[default]
    Command,
    /// OpenAI-compatible transcription endpoint
    Http,
}

impl std::str::FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "command" | "cli" => Ok(Self::Command),
            "http" => Ok(Self::Http),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Backend
    pub provider: SttProvider,

    /// Executable for the command backend
    pub command: String,

    /// Model path (command) or model name (http)
    pub model: String,

    /// Spoken language code
    pub language: String,

    /// Endpoint base URL for the http backend
    pub url: Option<String>,

    /// Bearer token for the http backend
    pub api_key: Option<String>,

    /// Deadline for one transcription
    pub timeout: Duration,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::Command,
            command: "whisper-cli".to_string(),
            model: "models/ggml-base.en.bin".to_string(),
            language: "en".to_string(),
            url: None,
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Text generation configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// System preamble (empty disables it)
    pub system_prompt: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum generated tokens
    pub max_tokens: u32,

    /// Hard request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.7,
            max_tokens: 150,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Piper executable
    pub piper_path: String,

    /// Voice model (`.onnx` file, directory, or path without extension)
    pub voice_model: PathBuf,

    /// Speech rate multiplier; 1.0 leaves duration untouched
    pub speed: f32,

    /// Deadline for one synthesis
    pub timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            piper_path: "piper".to_string(),
            voice_model: PathBuf::from("models/piper/en_US-lessac-medium"),
            speed: 1.0,
            timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration
    ///
    /// An explicit `path` must exist and parse. Without one, the standard
    /// config file is used when present.
    ///
    /// # Errors
    ///
    /// Returns error if the explicit file is unreadable or the result is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        let mut config = Self::from_file(file)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from a parsed file overlay
    ///
    /// # Errors
    ///
    /// Returns error if an enumerated value is unknown
    pub fn from_file(file: DannConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let audio = AudioConfig {
            sample_rate: file.audio.sample_rate.unwrap_or(defaults.audio.sample_rate),
            channels: file.audio.channels.unwrap_or(defaults.audio.channels),
            block_ms: file.audio.block_ms.unwrap_or(defaults.audio.block_ms),
            silence_timeout_ms: file
                .audio
                .silence_timeout_ms
                .unwrap_or(defaults.audio.silence_timeout_ms),
            max_record_ms: file
                .audio
                .max_record_ms
                .unwrap_or(defaults.audio.max_record_ms),
            silence_threshold: file
                .audio
                .silence_threshold
                .unwrap_or(defaults.audio.silence_threshold),
            input_device: file.audio.input_device,
            output_device: file.audio.output_device,
        };

        let wake_word = WakeWordConfig {
            engine: file
                .wake_word
                .engine
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or(defaults.wake_word.engine),
            model_path: file.wake_word.model_path.map(PathBuf::from),
            sensitivity: file
                .wake_word
                .sensitivity
                .unwrap_or(defaults.wake_word.sensitivity),
            debounce: file.wake_word.debounce.unwrap_or(defaults.wake_word.debounce),
            cooldown: file
                .wake_word
                .cooldown_ms
                .map_or(defaults.wake_word.cooldown, Duration::from_millis),
        };

        let stt = SttConfig {
            provider: file
                .stt
                .provider
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or(defaults.stt.provider),
            command: file.stt.command.unwrap_or(defaults.stt.command),
            model: file.stt.model.unwrap_or(defaults.stt.model),
            language: file.stt.language.unwrap_or(defaults.stt.language),
            url: file.stt.url,
            api_key: file.stt.api_key,
            timeout: file
                .stt
                .timeout_secs
                .map_or(defaults.stt.timeout, Duration::from_secs),
        };

        let llm = LlmConfig {
            base_url: file.llm.base_url.unwrap_or(defaults.llm.base_url),
            model: file.llm.model.unwrap_or(defaults.llm.model),
            system_prompt: file.llm.system_prompt.unwrap_or(defaults.llm.system_prompt),
            temperature: file.llm.temperature.unwrap_or(defaults.llm.temperature),
            max_tokens: file.llm.max_tokens.unwrap_or(defaults.llm.max_tokens),
            timeout: file
                .llm
                .timeout_secs
                .map_or(defaults.llm.timeout, Duration::from_secs),
        };

        let tts = TtsConfig {
            piper_path: file.tts.piper_path.unwrap_or(defaults.tts.piper_path),
            voice_model: file
                .tts
                .voice_model
                .map_or(defaults.tts.voice_model, PathBuf::from),
            speed: file.tts.speed.unwrap_or(defaults.tts.speed),
            timeout: file
                .tts
                .timeout_secs
                .map_or(defaults.tts.timeout, Duration::from_secs),
        };

        Ok(Self {
            audio,
            wake_word,
            stt,
            llm,
            tts,
        })
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("DANN_STT_API_KEY") {
            self.stt.api_key = Some(key);
        }
        if let Ok(path) = std::env::var("DANN_WAKE_MODEL") {
            self.wake_word.model_path = Some(PathBuf::from(path));
        }
        if let Ok(url) = std::env::var("DANN_LLM_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("DANN_LLM_MODEL") {
            self.llm.model = model;
        }
    }

    /// Check that the configuration can drive the pipeline
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.sample_rate == 0 || audio.channels == 0 || audio.block_ms == 0 {
            return Err(Error::Config(
                "audio.sample_rate, audio.channels and audio.block_ms must be non-zero".to_string(),
            ));
        }
        if audio.block_samples() == 0 {
            return Err(Error::Config(
                "audio.block_ms is shorter than one sample".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&audio.silence_threshold) {
            return Err(Error::Config(
                "audio.silence_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        let wake = &self.wake_word;
        if !(0.0..=1.0).contains(&wake.sensitivity) {
            return Err(Error::Config(
                "wake_word.sensitivity must be between 0.0 and 1.0".to_string(),
            ));
        }
        if wake.debounce == 0 {
            return Err(Error::Config(
                "wake_word.debounce must be at least 1".to_string(),
            ));
        }
        if wake.engine == WakeEngine::Rustpotter {
            match &wake.model_path {
                None => {
                    return Err(Error::Config(
                        "wake_word.model_path required for the rustpotter engine".to_string(),
                    ));
                }
                Some(path) if !path.exists() => {
                    return Err(Error::Config(format!(
                        "wake word model not found: {}",
                        path.display()
                    )));
                }
                Some(_) => {}
            }
        }

        if self.stt.provider == SttProvider::Http && self.stt.url.is_none() {
            return Err(Error::Config(
                "stt.url required for the http provider".to_string(),
            ));
        }

        if self.tts.speed <= 0.0 {
            return Err(Error::Config("tts.speed must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy_config() -> Config {
        let mut config = Config::default();
        config.wake_word.engine = WakeEngine::Energy;
        config
    }

    #[test]
    fn test_defaults_match_reference() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.block_samples(), 1600);
        assert_eq!(config.audio.block_duration(), Duration::from_millis(100));
        assert_eq!(config.wake_word.debounce, 2);
        assert_eq!(config.wake_word.cooldown, Duration::from_secs(2));
        assert_eq!(config.llm.timeout, Duration::from_secs(60));
        assert_eq!(config.llm.max_tokens, 150);
    }

    #[test]
    fn test_from_file_overlays_defaults() {
        let file: DannConfigFile = toml::from_str(
            r#"
            [audio]
            block_ms = 50

            [wake_word]
            engine = "energy"
            cooldown_ms = 500

            [stt]
            provider = "http"
            url = "http://localhost:8080"
            "#,
        )
        .unwrap();

        let config = Config::from_file(file).unwrap();
        assert_eq!(config.audio.block_ms, 50);
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.wake_word.engine, WakeEngine::Energy);
        assert_eq!(config.wake_word.cooldown, Duration::from_millis(500));
        assert_eq!(config.stt.provider, SttProvider::Http);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let file: DannConfigFile = toml::from_str("[wake_word]\nengine = \"porcupine\"").unwrap();
        assert!(matches!(Config::from_file(file), Err(Error::Config(_))));
    }

    #[test]
    fn test_rustpotter_requires_model() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.wake_word.model_path = Some(PathBuf::from("/nonexistent/ok_dann.rpw"));
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let model = tempfile::NamedTempFile::new().unwrap();
        config.wake_word.model_path = Some(model.path().to_path_buf());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = energy_config();
        config.audio.silence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = energy_config();
        config.wake_word.debounce = 0;
        assert!(config.validate().is_err());

        let mut config = energy_config();
        config.tts.speed = 0.0;
        assert!(config.validate().is_err());

        let mut config = energy_config();
        config.stt.provider = SttProvider::Http;
        assert!(config.validate().is_err());

        assert!(energy_config().validate().is_ok());
    }
}
