//! Language model integration
//!
//! Features:
//! - Ollama-compatible `/api/chat` backend
//! - Exponential-backoff retry for transient failures

pub mod backend;

pub use backend::{LlmConfig, OllamaClient};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for voice_call_core::Error {
    fn from(err: LlmError) -> Self {
        voice_call_core::Error::Inference(err.to_string())
    }
}
