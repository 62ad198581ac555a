//! Text-generation collaborator abstraction.
//!
//! [`ChatModel`] is the seam the answer pipeline and the issue-analysis
//! endpoint generate through. Providers mirror the embedding side: an
//! OpenAI-compatible chat-completions backend, a local Ollama instance, and
//! a disabled placeholder. Calls enforce a timeout and retry transient
//! failures at most `max_retries` times before surfacing
//! [`Error::Generation`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::embedding::request_with_retry;
use crate::error::{Error, Result};

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Produce a completion for one system + user prompt pair.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub fn create_chat_model(config: &GenerationConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChatModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChatModel::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledChatModel)),
        other => Err(Error::validation(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

// ============ Disabled provider ============

pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(Error::generation("text generation provider is disabled"))
    }
}

// ============ OpenAI-compatible provider ============

/// Chat model for OpenAI-compatible `/chat/completions` endpoints.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiChatModel {
    model: String,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::validation("generation.model required for OpenAI provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::validation(
                "OPENAI_API_KEY environment variable not set",
            ));
        }
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            model,
            base_url,
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::generation("OPENAI_API_KEY not set"))?;
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.2,
        });

        let json = request_with_retry(self.max_retries, "generation", || {
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
        })
        .await
        .map_err(Error::generation)?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::generation("invalid chat response: missing message content"))
    }
}

// ============ Ollama provider ============

/// Chat model using a local Ollama instance's `/api/chat`.
pub struct OllamaChatModel {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::validation("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            url,
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": false,
        });

        let json = request_with_retry(self.max_retries, "generation", || {
            self.client.post(format!("{}/api/chat", self.url)).json(&body)
        })
        .await
        .map_err(Error::generation)?;

        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::generation("invalid Ollama chat response: missing content"))
    }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))
}

/// Strips a surrounding Markdown code fence from model output.
///
/// Models asked for Markdown sometimes wrap the whole reply in
/// ```` ```markdown ... ``` ````; the inner content is what callers want.
pub fn strip_markdown_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let without_open = match trimmed.find('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => return trimmed.to_string(),
    };
    let without_close = without_open
        .strip_suffix("```")
        .unwrap_or(without_open);
    without_close.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_chat_model_errors() {
        let err = DisabledChatModel.complete("s", "u").await.unwrap_err();
        assert_eq!(err.kind(), "generation");
    }

    #[test]
    fn strip_fence_with_language_tag() {
        let input = "```markdown\n## Heading\n\nBody text.\n```";
        assert_eq!(strip_markdown_fence(input), "## Heading\n\nBody text.");
    }

    #[test]
    fn strip_fence_without_language_tag() {
        let input = "```\nplain fenced\n```";
        assert_eq!(strip_markdown_fence(input), "plain fenced");
    }

    #[test]
    fn unfenced_text_passes_through() {
        assert_eq!(strip_markdown_fence("  no fence here  "), "no fence here");
    }

    #[test]
    fn inner_fences_survive() {
        let input = "```markdown\nUse ```code``` sparingly.\n```";
        assert_eq!(strip_markdown_fence(input), "Use ```code``` sparingly.");
    }
}
