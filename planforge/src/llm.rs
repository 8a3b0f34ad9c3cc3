//! LLM client abstraction.
//!
//! The orchestrator only ever sees the `LlmClient` trait: one async
//! `complete` call returning the full completion text. Model and temperature
//! routing live with the client implementation, not the generation loop.
//! `StubLlmClient` ships as real code, not test-only: it is the offline
//! backend for demos and for exercising the pipeline without credentials.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::LlmError;

/// One chat message in the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// An async chat-completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion over the full message history and return the
    /// model's text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Human-readable label for diagnostics ("openai:gpt-4o", "stub").
    fn model_label(&self) -> String;
}

/// Configuration for the OpenAI-compatible HTTP backend.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Chat-completion client for OpenAI-compatible endpoints.
pub struct OpenAiClient {
    config: OpenAiConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey)?;
        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": messages,
        });
        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(api_key)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Http(e.to_string())
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                LlmError::MalformedResponse("no choices[0].message.content in reply".to_string())
            })
    }

    fn model_label(&self) -> String {
        format!("openai:{}", self.config.model)
    }
}

/// Canned-response backend: pops one queued response per call and records
/// every message history it was shown.
#[derive(Default)]
pub struct StubLlmClient {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl StubLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every message history `complete` has been called with, in order.
    pub fn recorded_calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for StubLlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front());
        next.ok_or_else(|| LlmError::MalformedResponse("stub response queue is empty".to_string()))
    }

    fn model_label(&self) -> String {
        "stub".to_string()
    }
}

/// Cut a string at a character boundary, appending a marker when cut.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…[truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_pops_responses_in_order_and_records_calls() {
        let stub = StubLlmClient::new(vec!["one".to_string(), "two".to_string()]);
        let history = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        assert_eq!(stub.complete(&history).await.unwrap(), "one");
        assert_eq!(stub.complete(&history).await.unwrap(), "two");
        assert!(stub.complete(&history).await.is_err());
        assert_eq!(stub.recorded_calls().len(), 3);
        assert_eq!(stub.recorded_calls()[0][1].content, "u");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let cut = truncate("こんにちは世界", 3);
        assert!(cut.starts_with("こんに"));
        assert!(cut.ends_with("[truncated]"));
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("x").role, "system");
        assert_eq!(ChatMessage::user("x").role, "user");
        assert_eq!(ChatMessage::assistant("x").role, "assistant");
    }
}
