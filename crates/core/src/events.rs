//! Transport events exchanged with the caller
//!
//! Both directions are JSON objects tagged by a `type` field.

use crate::session::{CallSettingsUpdate, CallSummary};
use serde::{Deserialize, Serialize};

/// Pipeline stage named in status and error events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transfer,
    Stt,
    Llm,
    Tts,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transfer => "transfer",
            Stage::Stt => "stt",
            Stage::Llm => "llm",
            Stage::Tts => "tts",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Active,
    Completed,
    Error,
}

/// Category of an AI message that did not come from the language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Greeting,
    SilencePrompt,
    CheckIn,
    PauseRequest,
    ContextWarning,
    ContextReset,
    Farewell,
    Redirect,
}

/// Per-stage latency reported with a response
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTiming {
    pub recognition_ms: u64,
    pub inference_ms: u64,
    pub synthesis_ms: u64,
    pub total_ms: u64,
    #[serde(default)]
    pub fallback_model: bool,
    #[serde(default)]
    pub fallback_voice: bool,
}

/// Events received from the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    SessionStart {
        #[serde(default)]
        settings: CallSettingsUpdate,
    },
    /// Base64-encoded audio chunk
    AudioData {
        #[serde(alias = "audio")]
        audio_data: String,
    },
    /// Caller released the talk button or went quiet
    UserStopSpeaking,
    Interrupt,
    SettingsUpdate {
        settings: CallSettingsUpdate,
    },
    SessionEnd,
    Ping,
}

/// Events sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionStarted {
        session_id: String,
    },
    Status {
        message: String,
    },
    ProcessStatus {
        stage: Stage,
        status: StageStatus,
        details: String,
    },
    Transcription {
        text: String,
    },
    AiResponse {
        text: String,
        /// Base64 audio; absent for text-only prompts and streamed responses
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timing: Option<ResponseTiming>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt: Option<PromptKind>,
    },
    StreamingAudioChunk {
        text: String,
        audio_chunk: String,
        chunk_index: usize,
        total_chunks: usize,
        is_final: bool,
    },
    FillerAudio {
        audio: String,
    },
    InterruptConfirmed {
        message: String,
    },
    SessionEnded {
        summary: CallSummary,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
    },
    Ping,
    Pong,
}

impl ServerEvent {
    pub fn status(message: impl Into<String>) -> Self {
        ServerEvent::Status {
            message: message.into(),
        }
    }

    pub fn stage(stage: Stage, status: StageStatus, details: impl Into<String>) -> Self {
        ServerEvent::ProcessStatus {
            stage,
            status,
            details: details.into(),
        }
    }

    pub fn error(message: impl Into<String>, stage: Option<Stage>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            stage,
        }
    }

    /// Text-only AI message such as a greeting or silence prompt
    pub fn prompt(kind: PromptKind, text: impl Into<String>) -> Self {
        ServerEvent::AiResponse {
            text: text.into(),
            audio: None,
            timing: None,
            prompt: Some(kind),
        }
    }

    /// Wire name of the event
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::SessionStarted { .. } => "session_started",
            ServerEvent::Status { .. } => "status",
            ServerEvent::ProcessStatus { .. } => "process_status",
            ServerEvent::Transcription { .. } => "transcription",
            ServerEvent::AiResponse { .. } => "ai_response",
            ServerEvent::StreamingAudioChunk { .. } => "streaming_audio_chunk",
            ServerEvent::FillerAudio { .. } => "filler_audio",
            ServerEvent::InterruptConfirmed { .. } => "interrupt_confirmed",
            ServerEvent::SessionEnded { .. } => "session_ended",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Ping => "ping",
            ServerEvent::Pong => "pong",
        }
    }
}
