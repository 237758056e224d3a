//! Collaborator traits consumed by the call pipeline
//!
//! Every external system the pipeline talks to sits behind one of these
//! traits so backends can be swapped and mocked in tests.
//!
//! ```text
//! Speech:
//!   - SpeechRecognizer: audio → text
//!   - SpeechSynthesizer: text → audio (primary and fallback share the contract)
//!   - FillerAudioSource: audio played while the model is thinking
//!
//! Language model:
//!   - LanguageModelClient: chat completion with an explicit model and deadline
//!
//! Policy:
//!   - ContentPolicy: topic validation and response filtering
//!
//! Side channels:
//!   - ConversationStore: save-on-teardown persistence
//!   - MetricsSink: fire-and-forget stage timings
//! ```

mod filler;
mod llm;
mod metrics;
mod policy;
mod speech;
mod store;

pub use filler::FillerAudioSource;
pub use llm::LanguageModelClient;
pub use metrics::{MetricsSink, NoopMetrics};
pub use policy::{ContentPolicy, TopicVerdict};
pub use speech::{SpeechRecognizer, SpeechSynthesizer, SynthesizedAudio, Transcription};
pub use store::{ConversationMetadata, ConversationStore};
