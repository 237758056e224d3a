//! Application State
//!
//! Shared state across all handlers, and the wiring of backends for a
//! production server.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use voice_call_config::Settings;
use voice_call_core::{ConversationStore, SpeechSynthesizer};
use voice_call_llm::{LlmConfig, OllamaClient};
use voice_call_persistence::{InMemoryStore, JsonFileStore};
use voice_call_pipeline::{
    BackendPool, HttpRecognizer, HttpSttConfig, HttpSynthesizer, HttpTtsConfig,
    InterruptCoordinator, KidFriendlyPolicy, PipelineOrchestrator, PrometheusMetrics,
    RandomPhrases, SpokenFiller,
};

use crate::session::SessionManager;
use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    /// Session manager
    pub sessions: Arc<SessionManager>,
    /// Prometheus handle, `None` when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Settings, sessions: Arc<SessionManager>) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Wire the HTTP backends, content policy and store named in `config`
    pub fn from_settings(config: Settings) -> Result<Self, ServerError> {
        let backends = &config.backends;

        let recognizer = HttpRecognizer::new(HttpSttConfig {
            url: backends.stt_url.clone(),
            timeout_ms: backends.request_timeout_ms,
            min_audio_bytes: config.audio.min_audio_length,
        })?;
        let llm = OllamaClient::new(LlmConfig::from(backends))
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        let primary_tts: Arc<dyn SpeechSynthesizer> = Arc::new(HttpSynthesizer::new(HttpTtsConfig {
            url: backends.tts_url.clone(),
            timeout_ms: backends.request_timeout_ms,
            name: "primary-tts".to_string(),
        })?);

        let mut orchestrator = PipelineOrchestrator::new(
            Arc::new(recognizer),
            Arc::new(llm),
            primary_tts.clone(),
            Arc::new(InterruptCoordinator::new()),
            BackendPool::new(&config.pool),
            config.pipeline.clone(),
        )
        .with_policy(Arc::new(KidFriendlyPolicy::new()))
        .with_filler(Arc::new(SpokenFiller::new(primary_tts, "default")));

        if let Some(url) = &backends.tts_fallback_url {
            let fallback = HttpSynthesizer::new(HttpTtsConfig {
                url: url.clone(),
                timeout_ms: backends.request_timeout_ms,
                name: "fallback-tts".to_string(),
            })?;
            orchestrator = orchestrator.with_fallback_tts(Arc::new(fallback));
        }
        if config.observability.metrics_enabled {
            orchestrator = orchestrator.with_metrics(Arc::new(PrometheusMetrics));
        }

        let store: Arc<dyn ConversationStore> = if config.persistence.enabled {
            tracing::info!(directory = %config.persistence.directory, "Persisting conversations to disk");
            Arc::new(JsonFileStore::new(&config.persistence.directory))
        } else {
            tracing::info!("Persistence disabled, keeping conversations in memory");
            Arc::new(InMemoryStore::new())
        };

        let sessions = SessionManager::new(&config, Arc::new(orchestrator), Arc::new(RandomPhrases))
            .with_store(store);

        Ok(Self::new(config, Arc::new(sessions)))
    }

    pub fn get_config(&self) -> &Settings {
        &self.config
    }
}
