//! In-memory conversation store

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use voice_call_core::{ConversationMetadata, ConversationStore, Result, Turn};

use crate::ConversationRecord;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<String, ConversationRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<ConversationRecord> {
        self.records.lock().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn save(
        &self,
        session_id: &str,
        turns: &[Turn],
        metadata: &ConversationMetadata,
    ) -> Result<()> {
        let record = ConversationRecord::new(session_id, turns, metadata);
        self.records.lock().insert(session_id.to_string(), record);
        tracing::debug!(session_id, turns = turns.len(), "Conversation kept in memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use voice_call_core::{CallSettings, EndReason};

    #[tokio::test]
    async fn test_save_replaces_previous_record() {
        let store = InMemoryStore::new();
        let metadata = ConversationMetadata {
            started_at: Utc::now(),
            ended_at: Utc::now(),
            end_reason: EndReason::UserInitiated,
            settings: CallSettings::default(),
        };

        store.save("s1", &[Turn::user("hi")], &metadata).await.unwrap();
        store
            .save("s1", &[Turn::user("hi"), Turn::assistant("hello")], &metadata)
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("s1").unwrap().turns.len(), 2);
        assert!(store.get("s2").is_none());
    }
}
