//! Conversation persistence
//!
//! Stores the turn history of a call once, at teardown:
//! - [`InMemoryStore`] for tests and persistence-disabled deployments
//! - [`JsonFileStore`] writing one JSON document per session

pub mod error;
pub mod json_file;
pub mod memory;

pub use error::PersistenceError;
pub use json_file::JsonFileStore;
pub use memory::InMemoryStore;

use serde::{Deserialize, Serialize};
use voice_call_core::{ConversationMetadata, Turn};

/// Everything saved for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub session_id: String,
    pub metadata: ConversationMetadata,
    pub turns: Vec<Turn>,
}

impl ConversationRecord {
    pub fn new(session_id: &str, turns: &[Turn], metadata: &ConversationMetadata) -> Self {
        Self {
            session_id: session_id.to_string(),
            metadata: metadata.clone(),
            turns: turns.to_vec(),
        }
    }
}
