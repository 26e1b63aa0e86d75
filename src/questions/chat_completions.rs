//! OpenAI-compatible chat-completions backend (OpenRouter by default).

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::generator::{GenerationPrompt, GeneratorError, QuestionGenerator};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "deepseek/deepseek-r1";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const REFERER: &str = "http://localhost";
const TITLE: &str = "Quiz-Show-Game";

/// Failures raised while building the chat-completions backend.
#[derive(Debug, Error)]
pub enum ChatConfigError {
    /// Required environment variable is missing.
    #[error("missing generator environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },
    /// An environment variable holds a value that cannot be parsed.
    #[error("invalid value for `{var}`: `{value}`")]
    InvalidEnvVar {
        /// Name of the variable.
        var: &'static str,
        /// The rejected value.
        value: String,
    },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build generator HTTP client")]
    ClientBuilder {
        /// Error reported by the client builder.
        #[source]
        source: reqwest::Error,
    },
}

/// Runtime configuration describing how to reach the completion endpoint.
#[derive(Debug, Clone)]
pub struct ChatGeneratorConfig {
    /// Base URL of the API, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ChatGeneratorConfig {
    /// Construct a configuration with default endpoint, model and sampling settings.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build a configuration by reading the expected environment variables.
    pub fn from_env() -> Result<Self, ChatConfigError> {
        let api_key = std::env::var("GENERATOR_API_KEY").map_err(|_| {
            ChatConfigError::MissingEnvVar {
                var: "GENERATOR_API_KEY",
            }
        })?;

        let mut config = Self::new(api_key);

        if let Ok(base_url) = std::env::var("GENERATOR_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(model) = std::env::var("GENERATOR_MODEL") {
            config.model = model;
        }
        if let Ok(value) = std::env::var("GENERATOR_TEMPERATURE") {
            config.temperature = value.parse().map_err(|_| ChatConfigError::InvalidEnvVar {
                var: "GENERATOR_TEMPERATURE",
                value: value.clone(),
            })?;
        }
        if let Ok(value) = std::env::var("GENERATOR_TIMEOUT_SECS") {
            let secs: u64 = value.parse().map_err(|_| ChatConfigError::InvalidEnvVar {
                var: "GENERATOR_TIMEOUT_SECS",
                value: value.clone(),
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Generator calling a `/chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatCompletionsGenerator {
    client: Client,
    endpoint: Arc<str>,
    api_key: Arc<str>,
    model: Arc<str>,
    temperature: f32,
}

impl ChatCompletionsGenerator {
    /// Build the HTTP client for the configured endpoint.
    pub fn new(config: ChatGeneratorConfig) -> Result<Self, ChatConfigError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| ChatConfigError::ClientBuilder { source })?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint: Arc::from(endpoint),
            api_key: Arc::from(config.api_key),
            model: Arc::from(config.model),
            temperature: config.temperature,
        })
    }

    async fn complete(self, prompt: GenerationPrompt) -> Result<String, GeneratorError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.instruction,
                },
            ],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(self.endpoint.as_ref())
            .bearer_auth(self.api_key.as_ref())
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .json(&request)
            .send()
            .await
            .map_err(|source| GeneratorError::unavailable("completion request failed", source))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload = response.json::<ChatResponse>().await.map_err(|source| {
            GeneratorError::unavailable("failed to decode completion response", source)
        })?;

        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GeneratorError::EmptyCompletion)?;

        debug!(model = %self.model, chars = content.len(), "received completion");
        Ok(content)
    }
}

impl QuestionGenerator for ChatCompletionsGenerator {
    fn generate(
        &self,
        prompt: GenerationPrompt,
    ) -> BoxFuture<'static, Result<String, GeneratorError>> {
        Box::pin(self.clone().complete(prompt))
    }
}
