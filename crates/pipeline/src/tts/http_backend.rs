//! HTTP TTS backend
//!
//! The service answers `POST {url}/synthesize` with the encoded audio as the
//! response body. The format is sniffed from the bytes.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use voice_call_core::{AudioFormat, Error, Result, SpeechSynthesizer, SynthesizedAudio};

/// HTTP TTS backend configuration
#[derive(Debug, Clone)]
pub struct HttpTtsConfig {
    /// Base URL of the synthesis service
    pub url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Name reported in logs and metrics
    pub name: String,
}

impl Default for HttpTtsConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8092".to_string(),
            timeout_ms: 20_000,
            name: "http-tts".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
    language: &'a str,
    speed: f32,
}

/// Synthesizer calling `POST {url}/synthesize`
pub struct HttpSynthesizer {
    config: HttpTtsConfig,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn new(config: HttpTtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Synthesis(format!("Failed to create HTTP client: {}", e)))?;
        tracing::info!(url = %config.url, name = %config.name, "HTTP TTS backend configured");
        Ok(Self { config, client })
    }

    pub fn with_url(url: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        Self::new(HttpTtsConfig {
            url: url.into(),
            name: name.into(),
            ..Default::default()
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        language: &str,
        speed: f32,
    ) -> Result<SynthesizedAudio> {
        if text.trim().is_empty() {
            return Err(Error::Synthesis("Nothing to synthesize".to_string()));
        }

        let url = format!("{}/synthesize", self.config.url);
        let request = SynthesizeRequest {
            text,
            voice,
            language,
            speed,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesis(format!("HTTP TTS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Synthesis(format!(
                "HTTP TTS service returned error: {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(format!("Failed to read TTS response: {}", e)))?
            .to_vec();

        if bytes.is_empty() {
            return Err(Error::Synthesis("TTS service returned no audio".to_string()));
        }

        let format = AudioFormat::detect(&bytes);
        tracing::debug!(bytes = bytes.len(), %format, backend = %self.config.name, "Synthesized");
        Ok(SynthesizedAudio { bytes, format })
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HttpTtsConfig::default();
        assert_eq!(config.url, "http://127.0.0.1:8092");
        assert_eq!(config.name, "http-tts");
    }

    #[test]
    fn test_request_shape() {
        let request = SynthesizeRequest {
            text: "hi",
            voice: "default",
            language: "en",
            speed: 1.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["text"], "hi");
        assert_eq!(json["voice"], "default");
        assert_eq!(json["speed"], 1.0);
    }

    #[tokio::test]
    async fn test_blank_text_rejected_without_request() {
        let tts = HttpSynthesizer::with_url("http://127.0.0.1:9", "primary").unwrap();
        let err = tts.synthesize("   ", "default", "en", 1.0).await.unwrap_err();
        assert!(matches!(err, Error::Synthesis(_)));
        assert_eq!(tts.name(), "primary");
    }
}
