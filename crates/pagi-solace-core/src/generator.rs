//! Text generation seam. The pipeline only sees [`TextGenerator`]; the model itself is external.
//!
//! `OpenRouterGenerator` calls an OpenAI-compatible `/chat/completions` endpoint (OpenRouter by
//! default). `MockGenerator` is the offline default and never fails.

use crate::config::{LlmMode, SolaceConfig};
use crate::error::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const LISTENER_SYSTEM_PROMPT: &str = "You are a warm, patient listener on a mental-health support line. \
Continue the conversation as the Bot. Reply in one to three short sentences, plain text, no lists. \
Reflect the user's feelings before offering anything. Never diagnose and never give medical instructions.";

const GENERATION_TEMPERATURE: f32 = 0.7;
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Continue `prompt`, producing at most `max_new_tokens` tokens.
    async fn generate(&self, prompt: &str, max_new_tokens: u32) -> Result<String, GenerationError>;

    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageResponse>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

pub struct OpenRouterGenerator {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenRouterGenerator {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_url: api_url.into(),
            api_key: api_key.into().trim().to_string(),
            model: model.into(),
            client,
        }
    }

    /// Live generator from config; `MissingApiKey` when no key is in the environment.
    pub fn from_config(cfg: &SolaceConfig) -> Result<Self, GenerationError> {
        let key = SolaceConfig::api_key().ok_or(GenerationError::MissingApiKey)?;
        Ok(Self::new(cfg.llm_api_url.clone(), key, cfg.llm_model.clone()))
    }
}

#[async_trait]
impl TextGenerator for OpenRouterGenerator {
    async fn generate(&self, prompt: &str, max_new_tokens: u32) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: LISTENER_SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: GENERATION_TEMPERATURE,
            max_tokens: max_new_tokens,
        };

        let res = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://pagi-solace.local")
            .header("X-Title", "PAGI-Solace")
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| GenerationError::Parse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(GenerationError::Empty)?;
        Ok(content)
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

/// Offline generator: reflects the last user line back. Deterministic.
#[derive(Debug, Default)]
pub struct MockGenerator;

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, prompt: &str, max_new_tokens: u32) -> Result<String, GenerationError> {
        let last = prompt.lines().last().unwrap_or_default().trim();
        let reply = if last.is_empty() {
            "I'm listening.".to_string()
        } else {
            format!("You said \"{}\". Tell me more about that.", last)
        };
        // Rough token budget: whitespace-separated words.
        Ok(reply
            .split_whitespace()
            .take(max_new_tokens.max(1) as usize)
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Generator for the configured mode. Live without a key falls back to mock with a warning.
pub fn generator_from_config(cfg: &SolaceConfig) -> Arc<dyn TextGenerator> {
    match cfg.llm_mode {
        LlmMode::Mock => Arc::new(MockGenerator),
        LlmMode::Live => match OpenRouterGenerator::from_config(cfg) {
            Ok(g) => {
                tracing::info!(target: "pagi::solace::generator", model = %cfg.llm_model, "live generation enabled");
                Arc::new(g)
            }
            Err(e) => {
                tracing::warn!(target: "pagi::solace::generator", error = %e, "live mode requested; falling back to mock");
                Arc::new(MockGenerator)
            }
        },
    }
}
