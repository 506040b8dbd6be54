use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::LlmConfig;
use crate::llm::models::Prompt;
use crate::llm::stream::{LineEvent, pump};
use crate::llm::{LlmBackend, LlmError};
use crate::streaming::FragmentSink;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3";

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let base = config
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_url = format!("{}/api/generate", base.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    async fn send(&self, prompt: &Prompt, stream: bool) -> Result<reqwest::Response, LlmError> {
        let request = OllamaRequest {
            model: &self.model,
            prompt: prompt.as_text(),
            stream,
            options: OllamaOptions {
                temperature: prompt.temperature,
            },
        };
        debug!("Sending request to Ollama: {:?}", request);

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Ollama API responded with status code: {} - {}", status, body);
            return Err(LlmError::Response(format!(
                "Ollama API responded with status code: {} - {}",
                status, body
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmBackend for OllamaProvider {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        info!("Sending request to Ollama with model: {}", self.model);
        let response = self.send(prompt, false).await?;

        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::Response(format!("Failed to read response body: {}", e)))?;
        debug!("Raw response from Ollama: {}", response_text);

        let parsed: OllamaResponse = serde_json::from_str(&response_text).map_err(|e| {
            LlmError::Response(format!(
                "Failed to parse Ollama response: {} - Response was: {}",
                e, response_text
            ))
        })?;
        Ok(parsed.response)
    }

    async fn complete_stream(&self, prompt: &Prompt, sink: &FragmentSink) -> Result<(), LlmError> {
        info!("Streaming from Ollama with model: {}", self.model);
        let response = self.send(prompt, true).await?;
        pump(response, sink, decode_line).await
    }
}

/// One NDJSON object of a streamed `/api/generate` body.
pub fn decode_line(line: &str) -> LineEvent {
    match serde_json::from_str::<OllamaResponse>(line) {
        // the closing object carries stats, not text
        Ok(chunk) if chunk.done => LineEvent::Done,
        Ok(chunk) => LineEvent::Fragment(chunk.response),
        Err(e) => {
            debug!("Skipping undecodable stream line ({}): {}", e, line);
            LineEvent::Skip
        }
    }
}
