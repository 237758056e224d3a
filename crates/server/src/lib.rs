//! Voice Call Server
//!
//! Provides the WebSocket call endpoint and HTTP health/metrics endpoints.

pub mod http;
pub mod metrics;
pub mod session;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::init_metrics;
pub use session::{Session, SessionManager, TurnStart};
pub use state::AppState;
pub use websocket::WebSocketHandler;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Max sessions reached ({0})")]
    Capacity(usize),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::CONFLICT,
            ServerError::SessionNotFound(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::Capacity(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<voice_call_core::Error> for ServerError {
    fn from(err: voice_call_core::Error) -> Self {
        match err {
            voice_call_core::Error::SessionNotFound(id) => ServerError::SessionNotFound(id),
            voice_call_core::Error::Transport(msg) => ServerError::WebSocket(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}
