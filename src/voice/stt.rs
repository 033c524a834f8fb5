//! Speech-to-text (STT) processing

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use crate::config::{SttConfig, SttProvider};
use crate::{Error, Result};

/// Turns a finished utterance into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a mono 16-bit WAV file
    ///
    /// Returns an empty string if nothing intelligible was heard.
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    async fn transcribe(&self, wav: &Path) -> Result<String>;
}

/// Response from an OpenAI-compatible transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes with a whisper.cpp-style command line tool
#[derive(Debug, Clone)]
pub struct WhisperCommand {
    program: PathBuf,
    model: String,
    language: String,
}

impl WhisperCommand {
    /// Create a transcriber running `command`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the executable cannot be found
    pub fn new(command: &str, model: String, language: String) -> Result<Self> {
        let program = which::which(command)
            .map_err(|e| Error::Config(format!("STT command '{command}' not found: {e}")))?;

        tracing::debug!(
            program = %program.display(),
            model,
            "whisper command transcriber initialized"
        );
        Ok(Self {
            program,
            model,
            language,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperCommand {
    async fn transcribe(&self, wav: &Path) -> Result<String> {
        tracing::debug!(file = %wav.display(), "starting whisper transcription");

        let output = tokio::process::Command::new(&self.program)
            .arg("-m")
            .arg(&self.model)
            .arg("-l")
            .arg(&self.language)
            .arg("-nt")
            .arg("-np")
            .arg("-f")
            .arg(wav)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Stt(format!("failed to run {}: {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Stt(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        let transcript = join_segments(&String::from_utf8_lossy(&output.stdout));
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Transcribes through an OpenAI-compatible `/v1/audio/transcriptions` endpoint
pub struct WhisperHttp {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    language: String,
}

impl WhisperHttp {
    /// Create a transcriber posting to `base_url`
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<String>, model: String, language: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/v1/audio/transcriptions", base_url.trim_end_matches('/')),
            api_key,
            model,
            language,
        }
    }
}

#[async_trait]
impl Transcriber for WhisperHttp {
    async fn transcribe(&self, wav: &Path) -> Result<String> {
        let audio = tokio::fs::read(wav).await?;
        tracing::debug!(
            audio_bytes = audio.len(),
            url = %self.url,
            "starting Whisper transcription"
        );

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "json");

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "Whisper request failed");
            e
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        let transcript = join_segments(&result.text);
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Join spoken transcript segments with single spaces
///
/// Whisper marks silence and noise with tags such as `[BLANK_AUDIO]` or
/// `(wind blowing)`; those segments carry no speech and are dropped.
fn join_segments(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_non_speech_tag(line))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_non_speech_tag(segment: &str) -> bool {
    let wrapped = |open: char, close: char| segment.starts_with(open) && segment.ends_with(close);
    wrapped('[', ']') || wrapped('(', ')')
}

/// Build the transcriber selected by configuration
///
/// # Errors
///
/// Returns `Error::Config` if the selected backend cannot be set up
pub fn build_transcriber(config: &SttConfig) -> Result<Box<dyn Transcriber>> {
    match config.provider {
        SttProvider::Command => Ok(Box::new(WhisperCommand::new(
            &config.command,
            config.model.clone(),
            config.language.clone(),
        )?)),
        SttProvider::Http => {
            let url = config.url.as_deref().ok_or_else(|| {
                Error::Config("stt.url required for the http provider".to_string())
            })?;
            Ok(Box::new(WhisperHttp::new(
                url,
                config.api_key.clone(),
                config.model.clone(),
                config.language.clone(),
            )))
        }
    }
}
