//! Turn-taking thresholds

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{invalid, ConfigError};

/// Timing heuristics for deciding who speaks next
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnTakingConfig {
    /// Pause after the caller stops before the AI may answer
    #[serde(default = "default_min_pause")]
    pub min_pause_for_response_ms: u64,

    /// Shorter pause used after an utterance that ended on a natural break
    #[serde(default = "default_natural_break_pause")]
    pub natural_break_pause_ms: u64,

    /// Continuous talk time after which the caller is asked to pause
    #[serde(default = "default_max_user_talk")]
    pub max_user_talk_time_ms: u64,

    /// Silence that counts as one rung on the prompt ladder
    #[serde(default = "default_max_silence")]
    pub max_silence_duration_ms: u64,

    /// Hard limit on call length
    #[serde(default = "default_conversation_timeout")]
    pub conversation_timeout_ms: u64,

    #[serde(default = "default_max_turns")]
    pub max_conversation_turns: usize,

    /// Period of the per-session monitor
    #[serde(default = "default_monitor_tick")]
    pub monitor_tick_ms: u64,

    /// Caller speech while the AI is busy that counts as barge-in
    #[serde(default = "default_barge_in_after")]
    pub barge_in_after_ms: u64,
}

fn default_min_pause() -> u64 {
    2000
}
fn default_natural_break_pause() -> u64 {
    1200
}
fn default_max_user_talk() -> u64 {
    30_000
}
fn default_max_silence() -> u64 {
    8000
}
fn default_conversation_timeout() -> u64 {
    300_000
}
fn default_max_turns() -> usize {
    20
}
fn default_monitor_tick() -> u64 {
    500
}
fn default_barge_in_after() -> u64 {
    3000
}

impl Default for TurnTakingConfig {
    fn default() -> Self {
        Self {
            min_pause_for_response_ms: default_min_pause(),
            natural_break_pause_ms: default_natural_break_pause(),
            max_user_talk_time_ms: default_max_user_talk(),
            max_silence_duration_ms: default_max_silence(),
            conversation_timeout_ms: default_conversation_timeout(),
            max_conversation_turns: default_max_turns(),
            monitor_tick_ms: default_monitor_tick(),
            barge_in_after_ms: default_barge_in_after(),
        }
    }
}

impl TurnTakingConfig {
    pub fn min_pause(&self) -> Duration {
        Duration::from_millis(self.min_pause_for_response_ms)
    }

    pub fn natural_break_pause(&self) -> Duration {
        Duration::from_millis(self.natural_break_pause_ms)
    }

    pub fn max_user_talk_time(&self) -> Duration {
        Duration::from_millis(self.max_user_talk_time_ms)
    }

    pub fn max_silence(&self) -> Duration {
        Duration::from_millis(self.max_silence_duration_ms)
    }

    pub fn conversation_timeout(&self) -> Duration {
        Duration::from_millis(self.conversation_timeout_ms)
    }

    pub fn monitor_tick(&self) -> Duration {
        Duration::from_millis(self.monitor_tick_ms)
    }

    pub fn barge_in_after(&self) -> Duration {
        Duration::from_millis(self.barge_in_after_ms)
    }

    /// Upper bound on context window entries
    pub fn max_context_entries(&self) -> usize {
        self.max_conversation_turns * 2
    }

    /// Turn count at which the caller is warned
    pub fn warning_turn(&self) -> usize {
        self.max_conversation_turns.saturating_sub(2)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_conversation_turns < 3 {
            return Err(invalid(
                "turn_taking.max_conversation_turns",
                format!("Must be at least 3, got {}", self.max_conversation_turns),
            ));
        }
        if self.monitor_tick_ms == 0 {
            return Err(invalid("turn_taking.monitor_tick_ms", "Must be positive"));
        }
        if self.max_silence_duration_ms == 0 || self.max_user_talk_time_ms == 0 {
            return Err(invalid(
                "turn_taking",
                "Silence and talk-time thresholds must be positive",
            ));
        }
        if self.natural_break_pause_ms > self.min_pause_for_response_ms {
            return Err(invalid(
                "turn_taking.natural_break_pause_ms",
                format!(
                    "Must not exceed min_pause_for_response_ms ({})",
                    self.min_pause_for_response_ms
                ),
            ));
        }
        if self.conversation_timeout_ms <= self.max_silence_duration_ms {
            return Err(invalid(
                "turn_taking.conversation_timeout_ms",
                "Must exceed max_silence_duration_ms",
            ));
        }
        Ok(())
    }
}
