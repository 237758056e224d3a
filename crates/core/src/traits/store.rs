//! Conversation persistence trait

use crate::{CallSettings, EndReason, Result, Turn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session-level facts saved alongside the turns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub settings: CallSettings,
}

/// Save-on-teardown store
///
/// Called once per session. Failures are logged by the caller and never
/// block teardown.
#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    async fn save(
        &self,
        session_id: &str,
        turns: &[Turn],
        metadata: &ConversationMetadata,
    ) -> Result<()>;
}
