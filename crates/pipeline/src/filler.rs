//! Filler audio synthesized once per language

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use voice_call_core::{FillerAudioSource, Result, SpeechSynthesizer};

pub const DEFAULT_FILLER_PHRASE: &str = "Hmm, let me think about that.";

/// Speaks a short phrase through a synthesizer and caches the audio
pub struct SpokenFiller {
    tts: Arc<dyn SpeechSynthesizer>,
    phrase: String,
    voice: String,
    cache: DashMap<String, Arc<Vec<u8>>>,
}

impl SpokenFiller {
    pub fn new(tts: Arc<dyn SpeechSynthesizer>, voice: impl Into<String>) -> Self {
        Self {
            tts,
            phrase: DEFAULT_FILLER_PHRASE.to_string(),
            voice: voice.into(),
            cache: DashMap::new(),
        }
    }

    pub fn with_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.phrase = phrase.into();
        self
    }

    pub fn cached_languages(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl FillerAudioSource for SpokenFiller {
    async fn filler(&self, language: &str) -> Result<Option<Vec<u8>>> {
        if let Some(audio) = self.cache.get(language) {
            return Ok(Some(audio.as_ref().clone()));
        }

        let audio = self
            .tts
            .synthesize(&self.phrase, &self.voice, language, 1.0)
            .await?;
        if audio.bytes.is_empty() {
            return Ok(None);
        }

        tracing::debug!(
            language,
            bytes = audio.bytes.len(),
            backend = self.tts.name(),
            "Cached filler audio"
        );
        let bytes = Arc::new(audio.bytes);
        self.cache.insert(language.to_string(), bytes.clone());
        Ok(Some(bytes.as_ref().clone()))
    }
}
