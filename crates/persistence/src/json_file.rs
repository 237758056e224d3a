//! JSON file conversation store
//!
//! Writes `{directory}/{session_id}.json`. The document is written to a
//! temporary sibling first and renamed into place, so readers never see a
//! partial file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use voice_call_core::{ConversationMetadata, ConversationStore, Result, Turn};

use crate::{ConversationRecord, PersistenceError};

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    directory: PathBuf,
}

impl JsonFileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, session_id: &str) -> std::result::Result<PathBuf, PersistenceError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PersistenceError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.directory.join(format!("{}.json", session_id)))
    }

    async fn write(&self, record: &ConversationRecord) -> std::result::Result<PathBuf, PersistenceError> {
        let path = self.path_for(&record.session_id)?;
        tokio::fs::create_dir_all(&self.directory).await?;

        let body = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    /// Read a saved conversation back
    pub async fn load(&self, session_id: &str) -> std::result::Result<ConversationRecord, PersistenceError> {
        let path = self.path_for(session_id)?;
        let body = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl ConversationStore for JsonFileStore {
    async fn save(
        &self,
        session_id: &str,
        turns: &[Turn],
        metadata: &ConversationMetadata,
    ) -> Result<()> {
        let record = ConversationRecord::new(session_id, turns, metadata);
        let path = self.write(&record).await?;
        tracing::info!(session_id, turns = turns.len(), path = %path.display(), "Conversation saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use voice_call_core::{CallSettings, EndReason, Error};

    fn metadata() -> ConversationMetadata {
        ConversationMetadata {
            started_at: Utc::now(),
            ended_at: Utc::now(),
            end_reason: EndReason::Disconnected,
            settings: CallSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("conversations"));
        let turns = vec![Turn::user("hello"), Turn::assistant("hi there")];

        store.save("abc-123", &turns, &metadata()).await.unwrap();

        let record = store.load("abc-123").await.unwrap();
        assert_eq!(record.turns, turns);
        assert_eq!(record.metadata.end_reason, EndReason::Disconnected);
        assert!(!dir.path().join("conversations/abc-123.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_rejects_path_like_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let err = store.save("../escape", &[], &metadata()).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }
}
