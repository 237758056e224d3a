//! Per-call conversation pipeline
//!
//! Features:
//! - Bounded inbound audio buffering
//! - Turn-taking state machine with a cancellable monitor
//! - Interrupt coordination for the single in-flight AI task of a session
//! - Recognize → validate → infer → filter → synthesize orchestration with fallbacks
//! - Shared backend pool providing backpressure across sessions

pub mod audio_buffer;
pub mod filler;
pub mod interrupt;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod pool;
pub mod stt;
pub mod tts;
pub mod turn_taking;

pub use audio_buffer::AudioBuffer;
pub use filler::SpokenFiller;
pub use interrupt::{InterruptCoordinator, TaskHandle, TaskKind};
pub use metrics::PrometheusMetrics;
pub use orchestrator::{PipelineOrchestrator, TurnOutcome, TurnScope};
pub use policy::KidFriendlyPolicy;
pub use pool::BackendPool;
pub use stt::{HttpRecognizer, HttpSttConfig};
pub use tts::{HttpSynthesizer, HttpTtsConfig};
pub use turn_taking::{
    ConversationPhase, ConversationSnapshot, DeterministicPhrases, InputAction, InputAnalysis,
    PhraseProvider, RandomPhrases, TurnOwner, TurnTaking,
};
