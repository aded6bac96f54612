use crate::error::GenerationError;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// A text-generation backend.
///
/// The concrete provider is picked once at startup; callers only ever see
/// this interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Runs one completion for a system instruction and a user message.
    async fn generate_text(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, GenerationError>;
}

/// An implementation of `TextGenerator` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "gpt-4o").
    /// * `timeout` - Upper bound on a single completion call.
    pub fn new(config: OpenAIConfig, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            timeout,
        }
    }
}

/// Maps a client error onto the generation error taxonomy.
fn classify(err: OpenAIError) -> GenerationError {
    match err {
        OpenAIError::ApiError(api) => {
            let code = api.code.clone().unwrap_or_default();
            let kind = api.r#type.clone().unwrap_or_default();
            if code.contains("quota") || code.contains("rate_limit") || kind.contains("rate_limit") {
                GenerationError::Quota(api.message)
            } else if code.contains("invalid_api_key") || kind.contains("authentication") {
                GenerationError::Auth(api.message)
            } else {
                GenerationError::Backend(api.message)
            }
        }
        other => GenerationError::Backend(other.to_string()),
    }
}

#[async_trait]
impl TextGenerator for OpenAICompatibleClient {
    async fn generate_text(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(max_tokens)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()
                    .map_err(classify)?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()
                    .map_err(classify)?
                    .into(),
            ])
            .build()
            .map_err(classify)?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout.as_secs()))?
            .map_err(classify)?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(GenerationError::EmptyResponse)?;
        debug!(finish_reason = ?choice.finish_reason, "Text backend call finished");

        match choice.message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(GenerationError::EmptyResponse),
        }
    }
}
