//! Lightweight analysis of transcribed caller speech

use once_cell::sync::Lazy;
use regex::Regex;

static NATURAL_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[.?!]\s+|\.\.\.|[.?!]\s*$|,\s+(?:and|so)\s+").expect("valid regex")
});

static ENDING_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:goodbye|bye|see you|that's all|end call|hang up)\b").expect("valid regex")
});

static INTERRUPT_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:stop|wait|hold on|pause|let me|actually)\b").expect("valid regex")
});

static EMERGENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:stop\s+stop|emergency\s+stop|emergency\s+interrupt|interrupt\s+now)\b")
        .expect("valid regex")
});

/// Sentence-final punctuation or a clause joined by ", and" / ", so"
pub fn has_natural_break(text: &str) -> bool {
    NATURAL_BREAK.is_match(text)
}

/// Caller is wrapping up the call
pub fn is_ending_phrase(text: &str) -> bool {
    ENDING_PHRASE.is_match(text)
}

/// Caller wants the floor back or to change direction
pub fn wants_to_interrupt(text: &str) -> bool {
    INTERRUPT_INTENT.is_match(text)
}

/// Explicit request to cut the AI off immediately
pub fn is_emergency_interrupt(text: &str) -> bool {
    EMERGENCY.is_match(text)
}

/// Approximate token load of a message
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
