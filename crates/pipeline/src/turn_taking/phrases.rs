//! AI-originated phrases
//!
//! The state machine never picks text itself; it asks a [`PhraseProvider`]
//! with the phrase kind and how many times that kind has been used in the
//! session.

use rand::seq::SliceRandom;
use voice_call_core::EndReason;

/// Something the AI says on its own initiative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phrase {
    /// Opening line; `hour` is the local hour of day
    Greeting { hour: u32, kid_friendly: bool },
    /// First rung of the silence ladder
    SilencePrompt,
    /// Second rung of the silence ladder
    CheckIn,
    /// Caller has been talking too long
    PauseRequest,
    ContextWarning,
    ContextReset,
    Farewell(EndReason),
}

/// Source of phrase text
pub trait PhraseProvider: Send + Sync + 'static {
    /// Text for `phrase`, where `occurrence` counts earlier uses of the same kind
    fn phrase(&self, phrase: Phrase, occurrence: usize) -> String;
}

const GREETINGS: &[&str] = &[
    "{salutation}! I'm your AI assistant. What's on your mind today?",
    "{salutation}! I'm here to help. What would you like to discuss?",
    "{salutation}! Thanks for calling. How can I assist you?",
    "{salutation}! I'm ready to chat. What brings you here today?",
];

const KID_GREETING: &str = "Hi there, little friend! What would you like to talk about today?";

const SILENCE_PROMPTS: &[&str] = &[
    "I'm here when you're ready. What would you like to discuss?",
    "Take your time. I'm listening when you want to continue.",
    "I'm here to help. What's on your mind?",
];

const CHECK_INS: &[&str] = &[
    "Are you still there? I'm ready to continue our conversation.",
    "I'm still here if you'd like to keep chatting.",
    "Feel free to ask me anything or share your thoughts.",
];

const PAUSE_REQUESTS: &[&str] = &[
    "Sorry to interrupt, but let me make sure I understand what you're saying so far...",
    "That's a lot of great information! Let me pause you there and ask a clarifying question...",
    "I want to make sure I'm following you. Can I summarize what I've heard so far?",
    "Hold on, let me process what you've shared. Can you give me a moment?",
];

const CONTEXT_WARNING: &str = "We've covered a lot of ground in our conversation! \
    To keep our chat focused, I might need to summarize and start fresh soon. \
    Is there anything specific you'd like me to remember?";

const CONTEXT_RESET: &str = "Our conversation has gotten quite long! \
    To continue effectively, I'll keep only our most recent exchanges in mind from here on.";

fn salutation(hour: u32) -> &'static str {
    match hour {
        5..=11 => "Good morning",
        12..=16 => "Good afternoon",
        17..=21 => "Good evening",
        _ => "Hello",
    }
}

fn farewell(reason: EndReason) -> &'static str {
    match reason {
        EndReason::Timeout => "We've been chatting for a while. Let me wrap up our conversation. Thank you for chatting with me!",
        EndReason::NoResponse => "I haven't heard from you in a while. Thank you for our conversation! Take care!",
        EndReason::UserInitiated => "Thank you for our great conversation! I enjoyed chatting with you. Goodbye!",
        EndReason::ContextLimit => "We've had such a rich conversation! Thank you for sharing so much with me. Have a great day!",
        _ => "Thank you for our conversation! I hope it was helpful. Have a great day!",
    }
}

fn templates(phrase: Phrase) -> &'static [&'static str] {
    match phrase {
        Phrase::Greeting { .. } => GREETINGS,
        Phrase::SilencePrompt => SILENCE_PROMPTS,
        Phrase::CheckIn => CHECK_INS,
        Phrase::PauseRequest => PAUSE_REQUESTS,
        Phrase::ContextWarning => &[CONTEXT_WARNING],
        Phrase::ContextReset => &[CONTEXT_RESET],
        Phrase::Farewell(_) => &[],
    }
}

fn render(phrase: Phrase, template: &str) -> String {
    match phrase {
        Phrase::Greeting { hour, .. } => template.replace("{salutation}", salutation(hour)),
        _ => template.to_string(),
    }
}

fn fixed(phrase: Phrase) -> Option<String> {
    match phrase {
        Phrase::Greeting {
            kid_friendly: true, ..
        } => Some(KID_GREETING.to_string()),
        Phrase::Farewell(reason) => Some(farewell(reason).to_string()),
        _ => None,
    }
}

/// Cycles through templates by occurrence; identical inputs give identical text
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicPhrases;

impl PhraseProvider for DeterministicPhrases {
    fn phrase(&self, phrase: Phrase, occurrence: usize) -> String {
        if let Some(text) = fixed(phrase) {
            return text;
        }
        let options = templates(phrase);
        render(phrase, options[occurrence % options.len()])
    }
}

/// Picks a random template each time
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPhrases;

impl PhraseProvider for RandomPhrases {
    fn phrase(&self, phrase: Phrase, occurrence: usize) -> String {
        if let Some(text) = fixed(phrase) {
            return text;
        }
        let options = templates(phrase);
        let template = options
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(options[occurrence % options.len()]);
        render(phrase, template)
    }
}
