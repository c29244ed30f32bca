//! Text-generation backends. The translator only needs "prompt in, text out",
//! so each API is wrapped behind [`TextGenerator`].

use crate::config::{Config, LlmProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Failures talking to a text-generation API.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Failed to reach {provider} API: {source}")]
    Request {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{0} response contained no text")]
    EmptyResponse(&'static str),
}

/// A single request/response call to a language model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        (**self).generate(prompt).await
    }
}

/// Build the generator selected by `LLM_PROVIDER`.
pub fn from_config(client: reqwest::Client, config: &Config) -> Box<dyn TextGenerator> {
    match config.llm_provider {
        LlmProvider::Anthropic => Box::new(AnthropicClient::new(client, config)),
        LlmProvider::OpenAi => Box::new(OpenAiClient::new(client, config)),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

impl Message {
    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

async fn read_error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|e| format!("<failed to read body: {}>", e))
}

// ==================== Anthropic ====================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Anthropic Messages API client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            api_url: config.llm_api_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
        }
    }
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message::user(prompt)],
        };

        debug!("Sending {} char prompt to Anthropic ({})", prompt.len(), self.model);

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|source| LlmError::Request {
                provider: "Anthropic",
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(LlmError::Api {
                provider: "Anthropic",
                status,
                body: read_error_body(response).await,
            });
        }

        let messages_response: MessagesResponse =
            response.json().await.map_err(|source| LlmError::Request {
                provider: "Anthropic",
                source,
            })?;

        messages_response
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text.trim().to_string())
            .ok_or(LlmError::EmptyResponse("Anthropic"))
    }
}

// ==================== OpenAI ====================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// Check if a model is a reasoning model that doesn't support temperature
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
}

/// OpenAI Chat Completions client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            api_url: config.llm_api_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::user(prompt)],
            max_completion_tokens: self.max_tokens,
            // Reasoning models don't support temperature
            temperature: if is_reasoning_model(&self.model) {
                None
            } else {
                Some(self.temperature)
            },
        };

        debug!("Sending {} char prompt to OpenAI ({})", prompt.len(), self.model);

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|source| LlmError::Request {
                provider: "OpenAI",
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(LlmError::Api {
                provider: "OpenAI",
                status,
                body: read_error_body(response).await,
            });
        }

        let chat_response: ChatResponse =
            response.json().await.map_err(|source| LlmError::Request {
                provider: "OpenAI",
                source,
            })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or(LlmError::EmptyResponse("OpenAI"))
    }
}
