//! Text-to-speech (TTS) processing

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::config::TtsConfig;
use crate::{Error, Result};

/// Renders reply text as a playable audio file
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` into a WAV file at `out`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str, out: &Path) -> Result<()>;
}

/// Synthesizes speech with the Piper command line tool
#[derive(Debug, Clone)]
pub struct PiperSynthesizer {
    program: PathBuf,
    voice: PathBuf,
    speed: f32,
}

impl PiperSynthesizer {
    /// Create a synthesizer from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the Piper binary or voice model cannot be found
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let program = which::which(&config.piper_path).map_err(|e| {
            Error::Config(format!("piper executable '{}' not found: {e}", config.piper_path))
        })?;
        let voice = resolve_voice_model(&config.voice_model)?;

        tracing::debug!(
            program = %program.display(),
            voice = %voice.display(),
            speed = config.speed,
            "piper synthesizer initialized"
        );

        Ok(Self {
            program,
            voice,
            speed: config.speed,
        })
    }

    /// Resolved `.onnx` voice model
    #[must_use]
    pub fn voice(&self) -> &Path {
        &self.voice
    }
}

#[async_trait]
impl Synthesizer for PiperSynthesizer {
    async fn synthesize(&self, text: &str, out: &Path) -> Result<()> {
        let text = text.trim();
        tracing::debug!(chars = text.len(), out = %out.display(), "synthesizing speech");

        let mut command = tokio::process::Command::new(&self.program);
        command
            .arg("--model")
            .arg(&self.voice)
            .arg("--output_file")
            .arg(out);
        if let Some(scale) = length_scale(self.speed) {
            command.arg("--length_scale").arg(scale.to_string());
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tts(format!("failed to run {}: {e}", self.program.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Tts(format!(
                "piper exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let written = tokio::fs::metadata(out).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(Error::Tts("piper produced no audio".to_string()));
        }

        Ok(())
    }
}

/// Piper length scale for a speed factor; `None` leaves duration untouched
#[allow(clippy::float_cmp)]
fn length_scale(speed: f32) -> Option<f32> {
    if speed == 1.0 || speed <= 0.0 {
        None
    } else {
        Some(1.0 / speed)
    }
}

/// Resolve a voice model setting to an existing `.onnx` file
///
/// A directory resolves to `model.onnx`, a sibling `<dir>.onnx`, or the first
/// `.onnx` file inside it. Any other path gets the `.onnx` extension.
///
/// # Errors
///
/// Returns `Error::Config` if no model file exists
pub fn resolve_voice_model(voice: &Path) -> Result<PathBuf> {
    if voice.is_dir() {
        let candidates = [voice.join("model.onnx"), voice.with_extension("onnx")];
        if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
            return Ok(found);
        }

        let mut onnx: Vec<PathBuf> = std::fs::read_dir(voice)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "onnx"))
            .collect();
        onnx.sort();
        if let Some(first) = onnx.into_iter().next() {
            return Ok(first);
        }
    }

    let file = if voice.extension().is_some_and(|ext| ext == "onnx") {
        voice.to_path_buf()
    } else {
        let mut name = voice.as_os_str().to_os_string();
        name.push(".onnx");
        PathBuf::from(name)
    };

    if file.is_file() {
        Ok(file)
    } else {
        Err(Error::Config(format!(
            "Piper voice model not found: {}",
            file.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_scale() {
        assert_eq!(length_scale(1.0), None);
        assert_eq!(length_scale(2.0), Some(0.5));
        assert_eq!(length_scale(0.5), Some(2.0));
        assert_eq!(length_scale(0.0), None);
    }

    #[test]
    fn test_resolve_appends_extension() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("en_US-lessac-medium.onnx");
        std::fs::write(&model, b"onnx").unwrap();

        let resolved = resolve_voice_model(&dir.path().join("en_US-lessac-medium")).unwrap();
        assert_eq!(resolved, model);
        assert_eq!(resolve_voice_model(&model).unwrap(), model);
    }

    #[test]
    fn test_resolve_directory() {
        let dir = tempfile::tempdir().unwrap();
        let voice_dir = dir.path().join("lessac");
        std::fs::create_dir(&voice_dir).unwrap();
        std::fs::write(voice_dir.join("b.onnx"), b"onnx").unwrap();
        std::fs::write(voice_dir.join("a.onnx"), b"onnx").unwrap();
        std::fs::write(voice_dir.join("a.onnx.json"), b"{}").unwrap();

        assert_eq!(resolve_voice_model(&voice_dir).unwrap(), voice_dir.join("a.onnx"));

        std::fs::write(voice_dir.join("model.onnx"), b"onnx").unwrap();
        assert_eq!(
            resolve_voice_model(&voice_dir).unwrap(),
            voice_dir.join("model.onnx")
        );
    }

    #[test]
    fn test_resolve_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_voice_model(&dir.path().join("missing"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
