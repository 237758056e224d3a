//! Audio container detection

use serde::{Deserialize, Serialize};

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Container format of an inbound audio payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Webm,
    Wav,
    Mp3,
    /// Headerless PCM
    #[default]
    Raw,
}

impl AudioFormat {
    /// Sniff the container from the leading bytes
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&EBML_MAGIC) {
            AudioFormat::Webm
        } else if bytes.starts_with(b"RIFF") && bytes.len() >= 12 && &bytes[8..12] == b"WAVE" {
            AudioFormat::Wav
        } else if bytes.starts_with(b"ID3") || bytes.starts_with(&[0xFF, 0xFB]) {
            AudioFormat::Mp3
        } else {
            AudioFormat::Raw
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Webm => "webm",
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Raw => "raw",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_webm() {
        let bytes = [0x1A, 0x45, 0xDF, 0xA3, 0x01, 0x00];
        assert_eq!(AudioFormat::detect(&bytes), AudioFormat::Webm);
    }

    #[test]
    fn test_detect_wav() {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0x24, 0x00, 0x00, 0x00]);
        bytes.extend_from_slice(b"WAVEfmt ");
        assert_eq!(AudioFormat::detect(&bytes), AudioFormat::Wav);
    }

    #[test]
    fn test_detect_fallback_raw() {
        assert_eq!(AudioFormat::detect(&[0u8; 16]), AudioFormat::Raw);
        assert_eq!(AudioFormat::detect(&[]), AudioFormat::Raw);
        assert_eq!(AudioFormat::detect(b"RIFF"), AudioFormat::Raw);
    }
}
