//! Error types for voice call processing

use crate::events::Stage;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while handling a call
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Inference timed out after {0:?}")]
    InferenceTimeout(Duration),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Backend pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Pipeline stage the error belongs to, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Transport(_) => Some(Stage::Transfer),
            Error::Recognition(_) => Some(Stage::Stt),
            Error::Inference(_) | Error::InferenceTimeout(_) => Some(Stage::Llm),
            Error::Synthesis(_) => Some(Stage::Tts),
            _ => None,
        }
    }

    /// Whether this error ends the session rather than the current turn
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
