//! Configuration management for the voice call server
//!
//! Supports loading configuration from:
//! - TOML/YAML files under `config/`
//! - Environment variables (VOICE_CALL_ prefix, `__` separator)

pub mod pipeline;
pub mod settings;
pub mod turn_taking;

pub use pipeline::{AudioBufferConfig, PipelineConfig, PoolConfig};
pub use settings::{
    load_settings, BackendConfig, ObservabilityConfig, PersistenceConfig, ServerConfig, Settings,
};
pub use turn_taking::TurnTakingConfig;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

pub(crate) fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}
