//! Language model trait

use crate::{ChatMessage, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Chat completion backend
///
/// Implementations:
/// - `OllamaClient` - local Ollama server
#[async_trait]
pub trait LanguageModelClient: Send + Sync + 'static {
    /// Complete a conversation
    ///
    /// # Arguments
    /// * `messages` - System prompt followed by the context window
    /// * `model` - Model to run; callers pass a smaller model on fallback
    /// * `timeout` - Deadline for the whole request
    ///
    /// # Returns
    /// The assistant reply text
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        timeout: Duration,
    ) -> Result<String>;

    fn name(&self) -> &str;
}
