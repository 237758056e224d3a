//! Speech processing traits

use crate::{AudioFormat, Result};
use async_trait::async_trait;

/// Result of a recognition call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transcription {
    pub text: String,
    /// Duration of the recognized audio if the backend reports it
    pub audio_duration_secs: Option<f32>,
}

impl Transcription {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            audio_duration_secs: None,
        }
    }

    /// True when nothing intelligible was recognized
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Synthesized speech
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

/// Speech-to-text interface
///
/// Implementations:
/// - `HttpRecognizer` - forwards audio to a transcription service
///
/// # Example
///
/// ```ignore
/// let stt: Arc<dyn SpeechRecognizer> = Arc::new(HttpRecognizer::new(config)?);
/// let result = stt.recognize(&audio, AudioFormat::Webm, "en").await?;
/// println!("Heard: {}", result.text);
/// ```
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Transcribe a complete utterance
    ///
    /// # Arguments
    /// * `audio` - Concatenated audio as drained from the session buffer
    /// * `format` - Container detected from the leading bytes
    /// * `language` - Caller language code
    async fn recognize(
        &self,
        audio: &[u8],
        format: AudioFormat,
        language: &str,
    ) -> Result<Transcription>;

    /// Name for logging
    fn name(&self) -> &str;
}

/// Text-to-speech interface
///
/// The primary and fallback synthesizers share this contract.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize text to audio
    ///
    /// # Arguments
    /// * `text` - Text to speak
    /// * `voice` - Voice identifier from call settings
    /// * `language` - Caller language code
    /// * `speed` - Speaking rate multiplier
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        language: &str,
        speed: f32,
    ) -> Result<SynthesizedAudio>;

    fn name(&self) -> &str;
}
