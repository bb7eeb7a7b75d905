//! Minimal LLM client used by the candidate ranker.
//!
//! The ranker needs one short, low-temperature completion per call; this
//! trait is the seam that keeps the non-deterministic dependency swappable
//! and lets tests substitute deterministic stubs.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String>;
}

/// OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": 0.0,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("LLM request to {} failed", self.endpoint))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read LLM response body")?;

        // A proxy returning an HTML error page would otherwise surface as an
        // opaque JSON parse failure.
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "LLM endpoint {} returned HTML instead of JSON (HTTP {}): {}",
                self.endpoint,
                status,
                preview
            ));
        }
        if !status.is_success() {
            let preview: String = body.chars().take(300).collect();
            return Err(anyhow!("LLM endpoint returned HTTP {}: {}", status, preview));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse LLM response (HTTP {})", status))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("LLM response contained no choices"))
    }
}
