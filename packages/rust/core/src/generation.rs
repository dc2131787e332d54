//! Generation collaborator.
//!
//! [`OpenRouterGenerator`] talks to any OpenAI-compatible chat-completions
//! endpoint (OpenRouter by default). Failures surface as
//! [`SiteChatError::Generation`]; the session turns them into a fixed
//! apology rather than an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sitechat_shared::{
    ConversationTurn, GenerationConfig, Result, SiteChatError, generation_api_key,
};

/// Everything the generator needs for one reply.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    /// Context prompt plus per-query instructions.
    pub system_prompt: String,
    /// Replayed turns, oldest first.
    pub history: &'a [ConversationTurn],
    pub query: &'a str,
    pub temperature: f32,
}

/// Produces a reply for a grounded conversation.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, request: &GenerationRequest<'_>) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
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
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_messages<'a>(request: &'a GenerationRequest<'_>) -> Vec<ChatMessage<'a>> {
    let mut messages = Vec::with_capacity(request.history.len() * 2 + 2);
    messages.push(ChatMessage {
        role: "system",
        content: &request.system_prompt,
    });
    for turn in request.history {
        messages.push(ChatMessage {
            role: "user",
            content: &turn.query,
        });
        messages.push(ChatMessage {
            role: "assistant",
            content: &turn.response,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: request.query,
    });
    messages
}

// ---------------------------------------------------------------------------
// OpenRouterGenerator
// ---------------------------------------------------------------------------

/// Chat-completions client for OpenRouter or another OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenRouterGenerator {
    client: Client,
    config: GenerationConfig,
    api_key: Option<String>,
}

impl OpenRouterGenerator {
    /// Build a client; the API key is read from `config.api_key_env`.
    ///
    /// A missing key is not an error here, only when a reply is requested, so
    /// scanning works without generation credentials.
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SiteChatError::Generation(format!("failed to build HTTP client: {e}")))?;
        let api_key = generation_api_key(&config).ok();

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl Generator for OpenRouterGenerator {
    #[instrument(skip_all, fields(model = %self.config.model, history = request.history.len()))]
    async fn complete(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            SiteChatError::Generation(format!(
                "API key not found. Set the {} environment variable.",
                self.config.api_key_env
            ))
        })?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: build_messages(request),
            temperature: request.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_output_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!(%url, temperature = request.temperature, "requesting completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SiteChatError::Generation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SiteChatError::Generation(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SiteChatError::Generation(format!("unreadable response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| SiteChatError::Generation("response contained no content".into()))
    }
}
