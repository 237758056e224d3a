//! Pipeline, audio buffer and backend pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{invalid, ConfigError};

/// Inbound audio buffering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioBufferConfig {
    /// Minimum processable utterance in bytes; the buffer is ready at twice this
    #[serde(default = "default_min_audio_length")]
    pub min_audio_length: usize,

    /// Chunks retained before the oldest is evicted
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    /// Smallest buffered amount worth flushing after a pause
    #[serde(default = "default_min_processable_bytes")]
    pub min_processable_bytes: usize,
}

fn default_min_audio_length() -> usize {
    1000
}
fn default_max_chunks() -> usize {
    10
}
fn default_min_processable_bytes() -> usize {
    2000
}

impl Default for AudioBufferConfig {
    fn default() -> Self {
        Self {
            min_audio_length: default_min_audio_length(),
            max_chunks: default_max_chunks(),
            min_processable_bytes: default_min_processable_bytes(),
        }
    }
}

/// Per-turn orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_inference_timeout")]
    pub inference_timeout_ms: u64,

    /// Smaller model tried once when the primary fails
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    #[serde(default = "default_fallback_timeout")]
    pub fallback_timeout_ms: u64,

    /// Most recent turns sent with the fallback request
    #[serde(default = "default_fallback_context_turns")]
    pub fallback_context_turns: usize,

    /// How long a cancelled backend call may keep running before it is abandoned
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,

    #[serde(default = "default_filler_delay")]
    pub filler_delay_ms: u64,

    /// Base64 audio longer than this is streamed in chunks
    #[serde(default = "default_stream_threshold")]
    pub stream_threshold_chars: usize,

    #[serde(default = "default_stream_chunk")]
    pub stream_chunk_chars: usize,

    #[serde(default = "default_min_response_interval")]
    pub min_response_interval_ms: u64,
}

fn default_model() -> String {
    "gemma2:2b".to_string()
}
fn default_inference_timeout() -> u64 {
    30_000
}
fn default_fallback_model() -> String {
    "gemma2:2b".to_string()
}
fn default_fallback_timeout() -> u64 {
    15_000
}
fn default_fallback_context_turns() -> usize {
    3
}
fn default_cancel_grace() -> u64 {
    250
}
fn default_filler_delay() -> u64 {
    500
}
fn default_stream_threshold() -> usize {
    50_000
}
fn default_stream_chunk() -> usize {
    30_000
}
fn default_min_response_interval() -> u64 {
    500
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            inference_timeout_ms: default_inference_timeout(),
            fallback_model: default_fallback_model(),
            fallback_timeout_ms: default_fallback_timeout(),
            fallback_context_turns: default_fallback_context_turns(),
            cancel_grace_ms: default_cancel_grace(),
            filler_delay_ms: default_filler_delay(),
            stream_threshold_chars: default_stream_threshold(),
            stream_chunk_chars: default_stream_chunk(),
            min_response_interval_ms: default_min_response_interval(),
        }
    }
}

impl PipelineConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn filler_delay(&self) -> Duration {
        Duration::from_millis(self.filler_delay_ms)
    }

    pub fn min_response_interval(&self) -> Duration {
        Duration::from_millis(self.min_response_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inference_timeout_ms == 0 {
            return Err(invalid("pipeline.inference_timeout_ms", "Must be positive"));
        }
        if self.fallback_timeout_ms == 0 || self.fallback_timeout_ms >= self.inference_timeout_ms {
            return Err(invalid(
                "pipeline.fallback_timeout_ms",
                format!(
                    "Must be positive and shorter than inference_timeout_ms ({})",
                    self.inference_timeout_ms
                ),
            ));
        }
        if self.fallback_context_turns == 0 {
            return Err(invalid("pipeline.fallback_context_turns", "Must be positive"));
        }
        if self.stream_chunk_chars == 0 || self.stream_chunk_chars % 4 != 0 {
            return Err(invalid(
                "pipeline.stream_chunk_chars",
                "Must be a positive multiple of 4",
            ));
        }
        Ok(())
    }
}

/// Shared limit on concurrent backend calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

fn default_max_connections() -> usize {
    16
}
fn default_acquire_timeout() -> u64 {
    5000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}
