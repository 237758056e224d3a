//! Per-session conversational state
//!
//! Pure bookkeeping: every method takes the current instant so the timing
//! rules can be exercised without a running clock.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use voice_call_core::Turn;

use super::analysis::{has_natural_break, wants_to_interrupt, word_count};

/// Who holds the floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOwner {
    User,
    Ai,
}

/// Coarse position in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    AiGreeting,
    WaitingForUser,
    UserSpeaking,
    ProcessingInput,
    AiResponding,
    Interrupting,
    Ended,
}

/// Diagnostic view of a session's turn-taking state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSnapshot {
    pub phase: ConversationPhase,
    pub owner: TurnOwner,
    pub turn_count: usize,
    pub silence_prompts: usize,
    pub user_speaking: bool,
    pub ai_speaking: bool,
    pub waiting_for_response: bool,
    pub pending_interruption: bool,
    pub quick_pause: bool,
    pub context_entries: usize,
    pub context_words: usize,
    pub elapsed_secs: f64,
}

#[derive(Debug)]
pub(crate) struct ConversationState {
    pub phase: ConversationPhase,
    pub owner: TurnOwner,
    pub started_at: Instant,
    pub last_user_input: Instant,
    pub last_ai_response: Instant,
    pub user_talk_start: Option<Instant>,
    pub last_user_stop: Option<Instant>,
    pub turn_count: usize,
    pub silence_prompts: usize,
    pub waiting_for_response: bool,
    pub user_response_pending: bool,
    pub user_speaking: bool,
    pub ai_speaking: bool,
    pub pending_interruption: bool,
    pub context_warned: bool,
    /// Last utterance ended on a natural break without hesitating
    pub quick_pause: bool,
    /// Running word count of AI output, for operators only
    pub context_words: usize,
    /// Uses per phrase kind, indexes match `PhraseSlot`
    pub phrase_uses: [usize; PHRASE_SLOTS],
    context: VecDeque<Turn>,
    max_context: usize,
}

pub(crate) const PHRASE_SLOTS: usize = 5;

/// Index into `phrase_uses`
#[derive(Debug, Clone, Copy)]
pub(crate) enum PhraseSlot {
    Greeting = 0,
    Silence = 1,
    CheckIn = 2,
    Pause = 3,
    Context = 4,
}

impl ConversationState {
    pub fn new(now: Instant, max_context: usize) -> Self {
        Self {
            phase: ConversationPhase::AiGreeting,
            owner: TurnOwner::Ai,
            started_at: now,
            last_user_input: now,
            last_ai_response: now,
            user_talk_start: None,
            last_user_stop: None,
            turn_count: 0,
            silence_prompts: 0,
            waiting_for_response: false,
            user_response_pending: false,
            user_speaking: false,
            ai_speaking: false,
            pending_interruption: false,
            context_warned: false,
            quick_pause: false,
            context_words: 0,
            phrase_uses: [0; PHRASE_SLOTS],
            context: VecDeque::with_capacity(max_context),
            max_context: max_context.max(1),
        }
    }

    /// Current use count for a slot, incrementing it
    pub fn next_use(&mut self, slot: PhraseSlot) -> usize {
        let n = self.phrase_uses[slot as usize];
        self.phrase_uses[slot as usize] += 1;
        n
    }

    pub fn is_ended(&self) -> bool {
        self.phase == ConversationPhase::Ended
    }

    pub fn start_user_speaking(&mut self, now: Instant) {
        if self.is_ended() || self.user_speaking {
            return;
        }
        self.user_speaking = true;
        self.user_talk_start = Some(now);
        self.last_user_input = now;
        if matches!(
            self.phase,
            ConversationPhase::WaitingForUser
                | ConversationPhase::AiGreeting
                | ConversationPhase::Interrupting
        ) {
            self.phase = ConversationPhase::UserSpeaking;
        }
    }

    pub fn stop_user_speaking(&mut self, now: Instant) {
        if !self.user_speaking {
            return;
        }
        self.user_speaking = false;
        self.user_talk_start = None;
        self.last_user_stop = Some(now);
        self.last_user_input = now;
        if self.phase == ConversationPhase::UserSpeaking {
            self.phase = ConversationPhase::WaitingForUser;
        }
    }

    /// Audio activity refreshes the talk timer without restarting it
    pub fn touch_user_activity(&mut self, now: Instant) {
        if self.user_speaking {
            self.last_user_input = now;
        }
    }

    pub fn should_wait_for_user(&self, now: Instant, min_pause: Duration) -> bool {
        if self.user_speaking {
            return true;
        }
        match self.last_user_stop {
            Some(stop) => now.saturating_duration_since(stop) <= min_pause,
            None => false,
        }
    }

    /// Pause to wait after the caller stops, given the configured pair
    pub fn response_pause(&self, min_pause: Duration, natural_break_pause: Duration) -> Duration {
        if self.quick_pause {
            natural_break_pause.min(min_pause)
        } else {
            min_pause
        }
    }

    pub fn talk_duration(&self, now: Instant) -> Option<Duration> {
        if !self.user_speaking {
            return None;
        }
        self.user_talk_start
            .map(|start| now.saturating_duration_since(start))
    }

    pub fn should_interrupt_user(&self, now: Instant, max_talk: Duration) -> bool {
        self.talk_duration(now).is_some_and(|d| d > max_talk)
    }

    /// Caller was asked to pause; speech state is cleared
    pub fn mark_pause_requested(&mut self, now: Instant) {
        self.user_speaking = false;
        self.user_talk_start = None;
        self.last_user_stop = Some(now);
        self.last_user_input = now;
        self.pending_interruption = true;
        self.phase = ConversationPhase::Interrupting;
    }

    fn push_context(&mut self, turn: Turn) {
        self.context.push_back(turn);
        while self.context.len() > self.max_context {
            self.context.pop_front();
        }
    }

    pub fn record_user_input(&mut self, text: &str, now: Instant) {
        self.push_context(Turn::user(text));
        self.quick_pause = has_natural_break(text) && !wants_to_interrupt(text);
        self.silence_prompts = 0;
        self.last_user_input = now;
        self.owner = TurnOwner::Ai;
        self.waiting_for_response = false;
        self.user_response_pending = true;
        self.pending_interruption = false;
        self.turn_count += 1;
        self.phase = ConversationPhase::ProcessingInput;
    }

    pub fn begin_ai_response(&mut self) {
        self.ai_speaking = true;
        self.phase = ConversationPhase::AiResponding;
    }

    pub fn record_ai_response(&mut self, text: &str, now: Instant) {
        self.push_context(Turn::assistant(text));
        self.owner = TurnOwner::User;
        self.waiting_for_response = true;
        self.user_response_pending = false;
        self.ai_speaking = false;
        self.last_ai_response = now;
        self.phase = ConversationPhase::WaitingForUser;
    }

    /// Hand the floor back after an aborted or interrupted turn
    pub fn revert_to_user(&mut self, now: Instant) {
        if self.is_ended() {
            return;
        }
        self.owner = TurnOwner::User;
        self.waiting_for_response = true;
        self.user_response_pending = false;
        self.ai_speaking = false;
        self.pending_interruption = false;
        self.last_ai_response = now;
        self.phase = if self.user_speaking {
            ConversationPhase::UserSpeaking
        } else {
            ConversationPhase::WaitingForUser
        };
    }

    pub fn note_ai_emission(&mut self, text: &str, now: Instant) {
        self.last_ai_response = now;
        self.context_words += word_count(text);
    }

    /// Time since either party last did anything
    pub fn silence(&self, now: Instant) -> Duration {
        let last = self.last_user_input.max(self.last_ai_response);
        now.saturating_duration_since(last)
    }

    /// Whether the silence ladder applies right now
    pub fn awaiting_user(&self) -> bool {
        !self.is_ended()
            && self.owner == TurnOwner::User
            && self.waiting_for_response
            && !self.user_speaking
            && !self.user_response_pending
    }

    pub fn context(&self) -> Vec<Turn> {
        self.context.iter().cloned().collect()
    }

    pub fn recent_context(&self, n: usize) -> Vec<Turn> {
        let skip = self.context.len().saturating_sub(n);
        self.context.iter().skip(skip).cloned().collect()
    }

    pub fn context_len(&self) -> usize {
        self.context.len()
    }

    pub fn snapshot(&self, now: Instant) -> ConversationSnapshot {
        ConversationSnapshot {
            phase: self.phase,
            owner: self.owner,
            turn_count: self.turn_count,
            silence_prompts: self.silence_prompts,
            user_speaking: self.user_speaking,
            ai_speaking: self.ai_speaking,
            waiting_for_response: self.waiting_for_response,
            pending_interruption: self.pending_interruption,
            quick_pause: self.quick_pause,
            context_entries: self.context.len(),
            context_words: self.context_words,
            elapsed_secs: now.saturating_duration_since(self.started_at).as_secs_f64(),
        }
    }
}
