//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{
    invalid, AudioBufferConfig, ConfigError, PipelineConfig, PoolConfig, TurnTakingConfig,
};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub turn_taking: TurnTakingConfig,

    #[serde(default)]
    pub audio: AudioBufferConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    /// Recognition, synthesis and language-model endpoints
    #[serde(default)]
    pub backends: BackendConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.turn_taking.validate()?;
        self.pipeline.validate()?;
        self.validate_server()?;
        self.validate_audio()?;

        if self.pool.max_connections == 0 {
            return Err(invalid("pool.max_connections", "Must be positive"));
        }
        if self.persistence.enabled && self.persistence.directory.trim().is_empty() {
            return Err(invalid(
                "persistence.directory",
                "Required when persistence is enabled",
            ));
        }
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(invalid("server.port", "Port cannot be 0"));
        }
        if self.server.max_sessions == 0 {
            return Err(invalid("server.max_sessions", "Must be positive"));
        }
        Ok(())
    }

    fn validate_audio(&self) -> Result<(), ConfigError> {
        if self.audio.max_chunks == 0 {
            return Err(invalid("audio.max_chunks", "Must be positive"));
        }
        if self.audio.min_audio_length == 0 {
            return Err(invalid("audio.min_audio_length", "Must be positive"));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS allowed origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Server-initiated ping period on idle sockets
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Period of the expired-session sweep
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ping_interval() -> u64 {
    10_000
}
fn default_max_sessions() -> usize {
    1000
}
fn default_cleanup_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            ping_interval_ms: default_ping_interval(),
            max_sessions: default_max_sessions(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// External service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_stt_url")]
    pub stt_url: String,

    #[serde(default = "default_tts_url")]
    pub tts_url: String,

    /// Lower-fidelity synthesizer used when the primary fails
    #[serde(default)]
    pub tts_fallback_url: Option<String>,

    #[serde(default = "default_llm_endpoint")]
    pub llm_endpoint: String,

    /// Per-request timeout for recognition and synthesis
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_stt_url() -> String {
    "http://127.0.0.1:8091".to_string()
}
fn default_tts_url() -> String {
    "http://127.0.0.1:8092".to_string()
}
fn default_llm_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_request_timeout() -> u64 {
    20_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            stt_url: default_stt_url(),
            tts_url: default_tts_url(),
            tts_fallback_url: None,
            llm_endpoint: default_llm_endpoint(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

/// Conversation persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// false keeps conversations in memory only
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_persistence_dir")]
    pub directory: String,
}

fn default_persistence_dir() -> String {
    "data/conversations".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_persistence_dir(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Sources, later ones overriding earlier:
/// `config/default`, `config/{env}`, then `VOICE_CALL__SECTION__KEY` variables.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_CALL")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
