//! HTTP STT backend
//!
//! Sends each drained utterance to an external transcription service.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use voice_call_core::{AudioFormat, Error, Result, SpeechRecognizer, Transcription};

/// HTTP STT backend configuration
#[derive(Debug, Clone)]
pub struct HttpSttConfig {
    /// Base URL of the transcription service
    pub url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Utterances shorter than this are not sent
    pub min_audio_bytes: usize,
}

impl Default for HttpSttConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8091".to_string(),
            timeout_ms: 20_000,
            min_audio_bytes: 1000,
        }
    }
}

/// Response from the transcription service
#[derive(Debug, Deserialize)]
struct SttResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    duration_sec: Option<f32>,
    #[serde(default)]
    error: Option<String>,
}

/// Recognizer calling `POST {url}/transcribe`
pub struct HttpRecognizer {
    config: HttpSttConfig,
    client: reqwest::Client,
}

impl HttpRecognizer {
    pub fn new(config: HttpSttConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Recognition(format!("Failed to create HTTP client: {}", e)))?;
        tracing::info!(url = %config.url, "HTTP STT backend configured");
        Ok(Self { config, client })
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        Self::new(HttpSttConfig {
            url: url.into(),
            ..Default::default()
        })
    }
}

fn content_type(format: AudioFormat) -> &'static str {
    match format {
        AudioFormat::Webm => "audio/webm",
        AudioFormat::Wav => "audio/wav",
        AudioFormat::Mp3 => "audio/mpeg",
        AudioFormat::Raw => "audio/pcm",
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn recognize(
        &self,
        audio: &[u8],
        format: AudioFormat,
        language: &str,
    ) -> Result<Transcription> {
        if audio.len() < self.config.min_audio_bytes {
            return Err(Error::Recognition(format!(
                "Audio too short ({} bytes)",
                audio.len()
            )));
        }

        let url = format!("{}/transcribe", self.config.url);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", content_type(format))
            .header("X-Language", language)
            .header("X-Audio-Format", format.as_str())
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| Error::Recognition(format!("HTTP STT request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Recognition(format!(
                "HTTP STT service returned error: {}",
                response.status()
            )));
        }

        let result: SttResponse = response
            .json()
            .await
            .map_err(|e| Error::Recognition(format!("Failed to parse STT response: {}", e)))?;

        if let Some(error) = result.error {
            return Err(Error::Recognition(error));
        }

        Ok(Transcription {
            text: result.text.trim().to_string(),
            audio_duration_secs: result.duration_sec,
        })
    }

    fn name(&self) -> &str {
        "http-stt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HttpSttConfig::default();
        assert_eq!(config.url, "http://127.0.0.1:8091");
        assert_eq!(config.timeout_ms, 20_000);
    }

    #[tokio::test]
    async fn test_short_audio_rejected_without_request() {
        let stt = HttpRecognizer::with_url("http://127.0.0.1:9").unwrap();
        let err = stt
            .recognize(&[0u8; 10], AudioFormat::Raw, "en")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Recognition(msg) if msg.contains("too short")));
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let parsed: SttResponse = serde_json::from_str(r#"{"text":" hi "}"#).unwrap();
        assert_eq!(parsed.text, " hi ");
        assert!(parsed.error.is_none());
    }
}
