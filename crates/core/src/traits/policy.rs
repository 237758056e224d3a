//! Content policy trait

/// Outcome of validating a user utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicVerdict {
    Allowed,
    /// Skip inference and say this instead
    Redirect(String),
}

/// Hooks applied around inference when a session opts in
pub trait ContentPolicy: Send + Sync + 'static {
    /// Check the user's words before inference
    fn validate_topic(&self, text: &str) -> TopicVerdict;

    /// Rewrite the model's reply before synthesis
    fn filter_response(&self, text: &str) -> String;

    /// System prompt prepended to the context window
    fn system_prompt(&self) -> Option<String> {
        None
    }
}
