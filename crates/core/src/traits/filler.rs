//! Filler audio trait

use crate::Result;
use async_trait::async_trait;

/// Provides transient audio to mask model latency
#[async_trait]
pub trait FillerAudioSource: Send + Sync + 'static {
    /// Audio to play, or `None` when nothing fits the moment
    async fn filler(&self, language: &str) -> Result<Option<Vec<u8>>>;
}
