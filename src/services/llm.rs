//! 上游语言模型客户端
//!
//! 每次请求只呼叫一次，超时由 reqwest 客户端强制执行，不做重试。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::config::LlmConfig;
use crate::error::{AppError, Result};
use crate::models::conversation::ConversationTurn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self::new(turn.role.as_str(), turn.content.clone())
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 送出完整的消息列表，返回助理回复内容
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

/// Ollama 兼容的 `/api/chat` 客户端
pub struct OllamaChatClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl OllamaChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            timeout,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::UpstreamUnavailable(format!(
                "language model did not respond within {}s",
                self.timeout.as_secs()
            ))
        } else {
            AppError::UpstreamUnavailable(format!("language model request failed: {}", e))
        }
    }
}

#[async_trait]
impl ChatModel for OllamaChatClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!(
            "Calling {} with {} messages at {}",
            self.model,
            messages.len(),
            self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&OllamaChatRequest {
                model: &self.model,
                messages,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("Language model returned {}: {}", status, error_text);
            return Err(AppError::UpstreamUnavailable(format!(
                "language model returned {}",
                status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        let parsed: OllamaChatResponse = serde_json::from_slice(&body).map_err(|e| {
            AppError::Internal(format!("malformed language model response: {}", e))
        })?;

        Ok(parsed.message.content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    Ok(Arc::new(OllamaChatClient::new(config)?))
}
