//! Persistence errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),
}

impl From<PersistenceError> for voice_call_core::Error {
    fn from(err: PersistenceError) -> Self {
        voice_call_core::Error::Persistence(err.to_string())
    }
}
