//! Reply generation via a local Ollama server

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::{Error, Result};

/// Generates a spoken reply for a transcript
#[async_trait]
pub trait Responder: Send + Sync {
    /// Generate a reply to `prompt`
    ///
    /// Returns an empty string when the model produced nothing.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, timeout, or a non-2xx response
    async fn respond(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Ollama `/api/generate` client
pub struct OllamaResponder {
    client: reqwest::Client,
    url: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaResponder {
    /// Create a responder from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        tracing::debug!(
            base_url = %config.base_url,
            model = %config.model,
            timeout_secs = config.timeout.as_secs(),
            "ollama responder initialized"
        );

        Ok(Self {
            client,
            url: format!("{}/api/generate", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Responder for OllamaResponder {
    async fn respond(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            system: Some(self.system_prompt.as_str()).filter(|s| !s.is_empty()),
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Llm(format!("request timed out: {e}"))
                } else {
                    Error::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "ollama API error");
            return Err(Error::Llm(format!("ollama error {status}: {body}")));
        }

        let result: GenerateResponse = response.json().await?;
        let reply = result.response.trim().to_string();
        tracing::debug!(response_len = reply.len(), "ollama responded");
        Ok(reply)
    }
}
