//! Core traits and types for voice call sessions
//!
//! This crate provides the vocabulary shared by every other crate:
//! - Call session, turn and settings types
//! - Transport events exchanged with the caller
//! - Collaborator traits (recognizer, language model, synthesizer, store, metrics, policy)
//! - Error types

pub mod audio;
pub mod conversation;
pub mod error;
pub mod events;
pub mod session;
pub mod sink;
pub mod traits;

pub use audio::AudioFormat;
pub use conversation::{ChatMessage, ChatRole, Turn, TurnRole, TurnTiming};
pub use error::{Error, Result};
pub use events::{ClientEvent, PromptKind, ResponseTiming, ServerEvent, Stage, StageStatus};
pub use session::{CallSession, CallSettings, CallSettingsUpdate, CallStatus, CallSummary, EndReason};
pub use sink::{ChannelSink, EventSink};

pub use traits::{
    ContentPolicy, ConversationMetadata, ConversationStore, FillerAudioSource,
    LanguageModelClient, MetricsSink, NoopMetrics, SpeechRecognizer, SpeechSynthesizer,
    SynthesizedAudio, TopicVerdict, Transcription,
};
