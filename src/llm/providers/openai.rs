use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::LlmConfig;
use crate::llm::models::{Message, Prompt};
use crate::llm::stream::{LineEvent, pump};
use crate::llm::{LlmBackend, LlmError};
use crate::streaming::FragmentSink;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Any OpenAI-compatible chat completion API (OpenAI, Groq, vLLM, ...).
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::Config("API key is required for the openai backend (LLM_API_KEY)".to_string())
        })?;

        let base = config
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_url = format!("{}/chat/completions", base.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    async fn send(&self, prompt: &Prompt, stream: bool) -> Result<reqwest::Response, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: &prompt.messages,
            temperature: prompt.temperature,
            stream,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Chat API responded with status code: {} - {}", status, body);
            return Err(LlmError::Response(format!(
                "Chat API responded with status code: {} - {}",
                status, body
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmBackend for OpenAiProvider {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        info!("Sending request to chat API with model: {}", self.model);
        let response = self.send(prompt, false).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Response(format!("Failed to parse chat response: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Response("Chat response contained no choices".to_string()))?;
        debug!("Raw response from chat API: {}", content);
        Ok(content)
    }

    async fn complete_stream(&self, prompt: &Prompt, sink: &FragmentSink) -> Result<(), LlmError> {
        info!("Streaming from chat API with model: {}", self.model);
        let response = self.send(prompt, true).await?;
        pump(response, sink, decode_line).await
    }
}

/// One server-sent-events line of a streamed chat completion.
pub fn decode_line(line: &str) -> LineEvent {
    // comments, event names and ids carry no text
    let Some(data) = line.strip_prefix("data:") else {
        return LineEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return LineEvent::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .map(LineEvent::Fragment)
            .unwrap_or(LineEvent::Skip),
        Err(e) => {
            debug!("Skipping undecodable event ({}): {}", e, data);
            LineEvent::Skip
        }
    }
}
