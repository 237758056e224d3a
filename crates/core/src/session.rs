//! Call session model

use crate::conversation::{Turn, TurnRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Dialing,
    Connected,
    Ended,
}

/// Why a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Conversation-level timeout elapsed
    Timeout,
    /// Caller stayed silent through every prompt
    NoResponse,
    /// Caller said goodbye
    UserInitiated,
    /// Turn budget exhausted
    ContextLimit,
    /// Explicit `session_end` from the client
    SessionEnd,
    /// Transport closed underneath the session
    Disconnected,
    /// Unrecoverable processing failure
    Error,
    /// Idle session reclaimed by the sweeper
    Expired,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Timeout => "timeout",
            EndReason::NoResponse => "no_response",
            EndReason::UserInitiated => "user_initiated",
            EndReason::ContextLimit => "context_limit",
            EndReason::SessionEnd => "session_end",
            EndReason::Disconnected => "disconnected",
            EndReason::Error => "error",
            EndReason::Expired => "expired",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_language() -> String {
    "en".to_string()
}

fn default_model() -> String {
    "gemma2:2b".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_voice() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

/// Caller-controlled settings for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSettings {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub kid_friendly: bool,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default)]
    pub interrupt_detection: bool,
    /// Play filler audio while the model is thinking
    #[serde(default = "default_true")]
    pub background_audio: bool,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            language: default_language(),
            model: default_model(),
            speed: default_speed(),
            kid_friendly: false,
            voice: default_voice(),
            interrupt_detection: false,
            background_audio: true,
        }
    }
}

/// Partial settings carried by `session_start` and `settings_update`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallSettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid_friendly: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_detection: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_audio: Option<bool>,
}

impl CallSettings {
    /// Apply the fields present in `update`
    pub fn apply(&mut self, update: CallSettingsUpdate) {
        if let Some(language) = update.language {
            self.language = language;
        }
        if let Some(model) = update.model {
            self.model = model;
        }
        if let Some(speed) = update.speed {
            self.speed = speed.clamp(0.5, 2.0);
        }
        if let Some(kid_friendly) = update.kid_friendly {
            self.kid_friendly = kid_friendly;
        }
        if let Some(voice) = update.voice {
            self.voice = voice;
        }
        if let Some(flag) = update.interrupt_detection {
            self.interrupt_detection = flag;
        }
        if let Some(flag) = update.background_audio {
            self.background_audio = flag;
        }
    }
}

/// One live or finished call and its ordered turn history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub id: String,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub settings: CallSettings,
    turns: Vec<Turn>,
}

impl CallSession {
    pub fn new(id: impl Into<String>, settings: CallSettings) -> Self {
        Self {
            id: id.into(),
            status: CallStatus::Dialing,
            started_at: Utc::now(),
            ended_at: None,
            settings,
            turns: Vec::new(),
        }
    }

    pub fn connect(&mut self) {
        if self.status == CallStatus::Dialing {
            self.status = CallStatus::Connected;
        }
    }

    pub fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Mark the call ended; later calls keep the first end time
    pub fn end(&mut self) {
        if self.status != CallStatus::Ended {
            self.status = CallStatus::Ended;
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn summary(&self, reason: EndReason) -> CallSummary {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        let duration = (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        CallSummary {
            duration_secs: duration,
            turns: self.turns.iter().filter(|t| t.role == TurnRole::User).count(),
            messages_exchanged: self.turns.len(),
            end_reason: reason,
        }
    }
}

/// Summary sent with `session_ended`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSummary {
    pub duration_secs: f64,
    pub turns: usize,
    pub messages_exchanged: usize,
    pub end_reason: EndReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_apply_partial() {
        let mut settings = CallSettings::default();
        settings.apply(CallSettingsUpdate {
            kid_friendly: Some(true),
            speed: Some(5.0),
            ..Default::default()
        });
        assert!(settings.kid_friendly);
        assert_eq!(settings.speed, 2.0);
        assert_eq!(settings.language, "en");
    }

    #[test]
    fn test_settings_deserialize_defaults() {
        let settings: CallSettings = serde_json::from_str(r#"{"voice":"alloy"}"#).unwrap();
        assert_eq!(settings.voice, "alloy");
        assert_eq!(settings.model, "gemma2:2b");
        assert!(settings.background_audio);
    }

    #[test]
    fn test_session_end_is_sticky() {
        let mut session = CallSession::new("s1", CallSettings::default());
        session.connect();
        assert_eq!(session.status, CallStatus::Connected);
        session.end();
        let first = session.ended_at;
        session.end();
        assert_eq!(session.ended_at, first);
        session.connect();
        assert_eq!(session.status, CallStatus::Ended);
    }

    #[test]
    fn test_summary_counts() {
        let mut session = CallSession::new("s1", CallSettings::default());
        session.push_turn(Turn::user("hi"));
        session.push_turn(Turn::assistant("hello"));
        session.push_turn(Turn::user("bye"));
        session.end();
        let summary = session.summary(EndReason::UserInitiated);
        assert_eq!(summary.turns, 2);
        assert_eq!(summary.messages_exchanged, 3);
        assert_eq!(summary.end_reason, EndReason::UserInitiated);
    }
}
