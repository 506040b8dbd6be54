pub mod models;
pub mod prompts;
pub mod providers;
pub mod stream;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::db::sanitizer::{clean_sql, strip_code_fences};
use crate::streaming::FragmentSink;
use models::{OutputKind, Prompt, Task};
use prompts::{PromptBuilder, PromptStyle};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    Connection(String),
    #[error("LLM response error: {0}")]
    Response(String),
    #[error("LLM configuration error: {0}")]
    Config(String),
    #[error("LLM prompt error: {0}")]
    Prompt(String),
}

/// A text-generation endpoint.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError>;

    /// Pushes generated text into `sink` as it arrives. Returns once the
    /// backend signals completion, the body ends, or the sink is closed.
    async fn complete_stream(&self, prompt: &Prompt, sink: &FragmentSink) -> Result<(), LlmError>;
}

pub struct LlmManager {
    backend: Box<dyn LlmBackend>,
    prompts: PromptBuilder,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let (backend, style): (Box<dyn LlmBackend>, PromptStyle) =
            match config.backend.to_lowercase().as_str() {
                "openai" => (
                    Box::new(providers::openai::OpenAiProvider::new(config)?),
                    PromptStyle::Chat,
                ),
                "ollama" => (
                    Box::new(providers::ollama::OllamaProvider::new(config)?),
                    PromptStyle::Instruction,
                ),
                _ => {
                    return Err(LlmError::Config(format!(
                        "Unsupported LLM backend: {}",
                        config.backend
                    )));
                }
            };

        Self::with_backend(backend, style, config)
    }

    pub fn with_backend(
        backend: Box<dyn LlmBackend>,
        style: PromptStyle,
        config: &LlmConfig,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            backend,
            prompts: PromptBuilder::new(style, config)?,
        })
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Builds the prompt for `task`, calls the backend and cleans the output
    /// according to the task's kind.
    pub async fn generate(&self, task: Task<'_>) -> Result<String, LlmError> {
        let prompt = self.prompts.build(&task)?;
        debug!("Prompt for {}: {:?}", task.name(), prompt);

        let raw = self.backend.complete(&prompt).await?;
        debug!("Raw output for {}: {}", task.name(), raw);

        let output = match task.output() {
            OutputKind::Sql => clean_sql(&raw),
            OutputKind::Code => strip_code_fences(&raw),
            OutputKind::Text => raw.trim().to_string(),
        };

        if output.is_empty() {
            return Err(LlmError::Response(format!(
                "empty output for {} request",
                task.name()
            )));
        }

        info!("Generated {} output ({} chars)", task.name(), output.len());
        Ok(output)
    }

    pub async fn chat_stream(&self, message: &str, sink: &FragmentSink) -> Result<(), LlmError> {
        let prompt = self.prompts.build(&Task::Chat { message })?;
        self.backend.complete_stream(&prompt, sink).await
    }
}
