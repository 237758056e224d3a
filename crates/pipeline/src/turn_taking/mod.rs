//! Turn-taking: who speaks next, and when the AI steps in on its own

mod analysis;
mod machine;
mod phrases;
mod state;

pub use analysis::{has_natural_break, is_emergency_interrupt, is_ending_phrase, wants_to_interrupt};
pub use machine::{InputAction, InputAnalysis, TurnTaking};
pub use phrases::{DeterministicPhrases, Phrase, PhraseProvider, RandomPhrases};
pub use state::{ConversationPhase, ConversationSnapshot, TurnOwner};
