//! Ollama chat backend
//!
//! Non-streaming `POST {endpoint}/api/chat`. Network errors and 5xx replies
//! are retried with exponential backoff; 4xx replies fail immediately.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use voice_call_config::BackendConfig;
use voice_call_core::{ChatMessage, ChatRole, LanguageModelClient};

use crate::LlmError;

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API endpoint
    pub endpoint: String,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
    /// Initial backoff duration (doubles each retry)
    pub initial_backoff: Duration,
    /// Keep model loaded between calls ("5m", "1h", "-1", "0")
    pub keep_alive: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434".to_string(),
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            keep_alive: "5m".to_string(),
        }
    }
}

impl From<&BackendConfig> for LlmConfig {
    fn from(backends: &BackendConfig) -> Self {
        Self {
            endpoint: backends.llm_endpoint.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }
}

/// Ollama-compatible language model client
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    config: LlmConfig,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        tracing::info!(endpoint = %config.endpoint, "Ollama client configured");
        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint, path)
    }

    /// Chat completion with retry
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let request = OllamaChatRequest {
            model,
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: false,
            options: Some(OllamaOptions {
                temperature: Some(self.config.temperature),
                top_p: Some(self.config.top_p),
                num_predict: Some(self.config.max_tokens as i32),
            }),
            keep_alive: Some(&self.config.keep_alive),
        };

        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    model,
                    attempt,
                    max_retries = self.config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "LLM request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute_request(&request, timeout).await {
                Ok(response) => {
                    tracing::debug!(
                        model,
                        tokens = response.eval_count.unwrap_or(0),
                        "LLM response received"
                    );
                    return Ok(response.message.content);
                }
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("Max retries exceeded".to_string())))
    }

    async fn execute_request(
        &self,
        request: &OllamaChatRequest<'_>,
        timeout: Duration,
    ) -> Result<OllamaChatResponse, LlmError> {
        let response = self
            .client
            .post(self.api_url("/chat"))
            .timeout(timeout)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            if status == StatusCode::NOT_FOUND {
                return Err(LlmError::ModelNotFound(request.model.to_string()));
            }
            // 5xx errors are retryable, 4xx are not
            if status.is_server_error() {
                return Err(LlmError::Network(format!("Server error {}: {}", status, error)));
            }
            return Err(LlmError::Api(error));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_))
    }
}

#[async_trait]
impl LanguageModelClient for OllamaClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        timeout: Duration,
    ) -> voice_call_core::Result<String> {
        match self.chat(messages, model, timeout).await {
            Ok(text) => Ok(text),
            Err(LlmError::Timeout) => Err(voice_call_core::Error::InferenceTimeout(timeout)),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for OllamaMessage {
    fn from(msg: &ChatMessage) -> Self {
        let role = match msg.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.keep_alive, "5m");
    }

    #[test]
    fn test_config_from_backends_trims_slash() {
        let backends = BackendConfig {
            llm_endpoint: "http://ollama:11434/".to_string(),
            ..Default::default()
        };
        assert_eq!(LlmConfig::from(&backends).endpoint, "http://ollama:11434");
    }

    #[test]
    fn test_message_conversion() {
        let msg = ChatMessage::system("Be brief");
        let ollama_msg = OllamaMessage::from(&msg);
        assert_eq!(ollama_msg.role, "system");
        assert_eq!(ollama_msg.content, "Be brief");
    }

    #[test]
    fn test_ollama_request_serialization() {
        let request = OllamaChatRequest {
            model: "gemma2:2b",
            messages: vec![OllamaMessage::from(&ChatMessage::user("hi"))],
            stream: false,
            options: None,
            keep_alive: Some("5m"),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gemma2:2b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("options").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"model":"gemma2:2b","message":{"role":"assistant","content":"Hello!"},"done":true,"eval_count":3}"#;
        let parsed: OllamaChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.content, "Hello!");
        assert_eq!(parsed.eval_count, Some(3));
    }

    #[test]
    fn test_only_network_errors_retry() {
        assert!(OllamaClient::is_retryable(&LlmError::Network("reset".into())));
        assert!(!OllamaClient::is_retryable(&LlmError::Api("bad".into())));
        assert!(!OllamaClient::is_retryable(&LlmError::Timeout));
    }
}
