//! OpenRouter adapter (chat completions).
//!
//! Thin HTTP client over the OpenAI-compatible `chat/completions` endpoint.
//! Returns the reply text plus the token counts the usage ledger meters.

use std::time::Duration;

use serde::Serialize;

use licbot_core::{errors::Error, usage::TokenUsage, Result};

const API_BASE: &str = "https://openrouter.ai/api/v1";

#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatReply {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Clone, Debug)]
pub struct OpenRouterClient {
    api_key: String,
    http: reqwest::Client,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build");
        Self {
            api_key: api_key.into(),
            http,
        }
    }

    pub async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatReply> {
        let resp = self
            .http
            .post(format!("{API_BASE}/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": model,
                "messages": messages,
            }))
            .send()
            .await
            .map_err(|e| Error::External(format!("openrouter request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "openrouter chat failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("openrouter json error: {e}")))?;

        let text = v
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();

        if text.trim().is_empty() {
            return Err(Error::External(
                "openrouter returned an empty completion".to_string(),
            ));
        }

        let usage = TokenUsage {
            prompt_tokens: v
                .pointer("/usage/prompt_tokens")
                .and_then(|x| x.as_u64())
                .unwrap_or(0),
            completion_tokens: v
                .pointer("/usage/completion_tokens")
                .and_then(|x| x.as_u64())
                .unwrap_or(0),
        };

        Ok(ChatReply { text, usage })
    }
}
