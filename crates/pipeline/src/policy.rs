//! Kid-friendly content policy

use once_cell::sync::Lazy;
use regex::Regex;
use voice_call_core::{ContentPolicy, TopicVerdict};

pub const REDIRECT_MESSAGE: &str =
    "Let's talk about something else that's fun! What's your favorite animal?";

const SAFE_TOPICS: &[&str] = &[
    "animals", "nature", "colors", "numbers", "letters", "games", "friends", "family", "school",
    "toys", "books", "music", "art", "space", "dinosaurs", "fairy tales",
];

const BLOCKED_TOPICS: &[&str] = &["violence", "death", "scary", "adult", "mature"];

const REPLACEMENTS: &[(&str, &str)] = &[
    ("stupid", "silly"),
    ("dumb", "confused"),
    ("idiot", "friend"),
    ("hate", "dislike"),
    ("kill", "stop"),
    ("die", "sleep"),
    ("death", "rest"),
    ("violent", "energetic"),
    ("scary", "surprising"),
    ("frightening", "exciting"),
    ("terrifying", "amazing"),
    ("horror", "adventure"),
    ("damn", "oh my"),
    ("hell", "heck"),
];

const SIMPLIFICATIONS: &[(&str, &str)] = &[
    ("difficult", "hard"),
    ("complicated", "tricky"),
    ("magnificent", "amazing"),
    ("enormous", "very big"),
    ("tiny", "very small"),
    ("fascinating", "really cool"),
];

const KID_SYSTEM_PROMPT: &str = "You are talking with a child. Please:
- Use simple, friendly language
- Stay positive and encouraging
- Avoid any inappropriate content for children
- Use lots of praise and encouragement
- If inappropriate topics come up, gently redirect the conversation
- Keep answers short and easy to understand";

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

fn word_rules(pairs: &[(&str, &'static str)]) -> Vec<Rule> {
    pairs
        .iter()
        .map(|(word, replacement)| Rule {
            pattern: Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))
                .expect("valid regex"),
            replacement: *replacement,
        })
        .collect()
}

static REPLACE_RULES: Lazy<Vec<Rule>> = Lazy::new(|| word_rules(REPLACEMENTS));
static SIMPLIFY_RULES: Lazy<Vec<Rule>> = Lazy::new(|| word_rules(SIMPLIFICATIONS));

/// Keeps conversations suitable for children
#[derive(Debug, Default, Clone, Copy)]
pub struct KidFriendlyPolicy;

impl KidFriendlyPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl ContentPolicy for KidFriendlyPolicy {
    fn validate_topic(&self, text: &str) -> TopicVerdict {
        let lower = text.to_lowercase();
        if SAFE_TOPICS.iter().any(|topic| lower.contains(topic)) {
            return TopicVerdict::Allowed;
        }
        if BLOCKED_TOPICS.iter().any(|keyword| lower.contains(keyword)) {
            return TopicVerdict::Redirect(REDIRECT_MESSAGE.to_string());
        }
        TopicVerdict::Allowed
    }

    fn filter_response(&self, text: &str) -> String {
        let mut out = text.to_string();
        for rule in REPLACE_RULES.iter().chain(SIMPLIFY_RULES.iter()) {
            if rule.pattern.is_match(&out) {
                out = rule.pattern.replace_all(&out, rule.replacement).into_owned();
            }
        }
        out
    }

    fn system_prompt(&self) -> Option<String> {
        Some(KID_SYSTEM_PROMPT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_topic_redirects() {
        let policy = KidFriendlyPolicy;
        assert_eq!(
            policy.validate_topic("tell me a scary story"),
            TopicVerdict::Redirect(REDIRECT_MESSAGE.to_string())
        );
    }

    #[test]
    fn test_safe_topic_wins_over_keyword() {
        let policy = KidFriendlyPolicy;
        assert_eq!(
            policy.validate_topic("are dinosaurs scary?"),
            TopicVerdict::Allowed
        );
        assert_eq!(policy.validate_topic("what is two plus two"), TopicVerdict::Allowed);
    }

    #[test]
    fn test_filter_replaces_whole_words_only() {
        let policy = KidFriendlyPolicy;
        assert_eq!(
            policy.filter_response("That puzzle is Difficult, not stupid."),
            "That puzzle is hard, not silly."
        );
        assert_eq!(policy.filter_response("a diet of shellfish"), "a diet of shellfish");
    }

    #[test]
    fn test_system_prompt_present() {
        assert!(KidFriendlyPolicy.system_prompt().unwrap().contains("child"));
    }
}
