//! Turn-taking state machine and its monitor
//!
//! One [`TurnTaking`] exists per call. It owns the conversation state, emits
//! AI-originated prompts through the session's event sink, and runs a
//! periodic monitor for silence, talk time, context size and call length.
//! The monitor stops exactly once, either on [`TurnTaking::stop_monitor`] or
//! when the conversation ends.

use chrono::Timelike;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use voice_call_config::TurnTakingConfig;
use voice_call_core::events::PromptKind;
use voice_call_core::{EndReason, EventSink, Result, ServerEvent, Turn};

use super::analysis;
use super::phrases::{Phrase, PhraseProvider};
use super::state::{
    ConversationPhase, ConversationSnapshot, ConversationState, PhraseSlot, TurnOwner,
};

/// What the orchestrator should do with a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Respond,
    /// The caller said goodbye; the conversation is already ending
    EndConversation,
}

/// Result of [`TurnTaking::handle_user_input`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAnalysis {
    pub action: InputAction,
    pub natural_break: bool,
    pub wants_to_interrupt: bool,
    pub emergency_interrupt: bool,
}

/// Work decided under the state lock and carried out after releasing it
#[derive(Debug)]
enum MonitorAction {
    Say(PromptKind, String),
    End(EndReason),
}

struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Per-session turn-taking state machine
pub struct TurnTaking {
    session_id: String,
    config: TurnTakingConfig,
    state: Mutex<ConversationState>,
    phrases: Arc<dyn PhraseProvider>,
    sink: Arc<dyn EventSink>,
    ended: watch::Sender<Option<EndReason>>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl TurnTaking {
    pub fn new(
        session_id: impl Into<String>,
        config: TurnTakingConfig,
        phrases: Arc<dyn PhraseProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let state = ConversationState::new(Instant::now(), config.max_context_entries());
        let (ended, _) = watch::channel(None);
        Arc::new(Self {
            session_id: session_id.into(),
            config,
            state: Mutex::new(state),
            phrases,
            sink,
            ended,
            monitor: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &TurnTakingConfig {
        &self.config
    }

    /// Greet the caller and start the monitor
    pub async fn start_conversation(self: &Arc<Self>, kid_friendly: bool) -> Result<()> {
        let hour = chrono::Local::now().hour();
        let greeting = {
            let mut state = self.state.lock();
            *state = ConversationState::new(Instant::now(), self.config.max_context_entries());
            let n = state.next_use(PhraseSlot::Greeting);
            self.phrases.phrase(Phrase::Greeting { hour, kid_friendly }, n)
        };

        self.say(PromptKind::Greeting, greeting).await?;

        {
            let mut state = self.state.lock();
            state.owner = TurnOwner::User;
            state.waiting_for_response = true;
            state.turn_count += 1;
            if state.phase == ConversationPhase::AiGreeting {
                state.phase = ConversationPhase::WaitingForUser;
            }
        }

        self.spawn_monitor();
        tracing::info!(session_id = %self.session_id, "Conversation started");
        Ok(())
    }

    fn spawn_monitor(self: &Arc<Self>) {
        let mut slot = self.monitor.lock();
        if slot.is_some() || self.is_ended() {
            return;
        }
        let cancel = CancellationToken::new();
        let weak: Weak<Self> = Arc::downgrade(self);
        let tick = self.config.monitor_tick();
        let token = cancel.clone();
        let session_id = self.session_id.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(machine) = weak.upgrade() else { break };
                        if !machine.tick().await {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(session_id = %session_id, "Turn-taking monitor stopped");
        });

        *slot = Some(MonitorHandle { cancel, task });
    }

    /// Stop the monitor; returns false if it was not running
    pub fn stop_monitor(&self) -> bool {
        match self.monitor.lock().take() {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn monitor_running(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|h| !h.cancel.is_cancelled() && !h.task.is_finished())
    }

    /// Run one monitor pass; returns false once the conversation is over
    pub async fn tick(&self) -> bool {
        let actions = self.evaluate(Instant::now());
        for action in actions {
            match action {
                MonitorAction::Say(kind, text) => {
                    if let Err(e) = self.say(kind, text).await {
                        tracing::warn!(session_id = %self.session_id, error = %e, "Monitor prompt not delivered");
                    }
                }
                MonitorAction::End(reason) => {
                    self.end_conversation(reason).await;
                }
            }
        }
        !self.is_ended()
    }

    fn evaluate(&self, now: Instant) -> Vec<MonitorAction> {
        let mut state = self.state.lock();
        let mut actions = Vec::new();
        if state.is_ended() {
            return actions;
        }

        if now.saturating_duration_since(state.started_at) > self.config.conversation_timeout() {
            actions.push(MonitorAction::End(EndReason::Timeout));
            return actions;
        }

        // Talk-duration check runs before anything driven by audio activity.
        if state.should_interrupt_user(now, self.config.max_user_talk_time()) {
            state.mark_pause_requested(now);
            let n = state.next_use(PhraseSlot::Pause);
            tracing::info!(session_id = %self.session_id, "Caller talked past limit, requesting pause");
            actions.push(MonitorAction::Say(
                PromptKind::PauseRequest,
                self.phrases.phrase(Phrase::PauseRequest, n),
            ));
        }

        let max_turns = self.config.max_conversation_turns;
        if state.turn_count >= max_turns {
            state.turn_count = 0;
            state.context_warned = false;
            let n = state.next_use(PhraseSlot::Context);
            tracing::info!(session_id = %self.session_id, "Turn budget reached, context reset");
            actions.push(MonitorAction::Say(
                PromptKind::ContextReset,
                self.phrases.phrase(Phrase::ContextReset, n),
            ));
        } else if state.turn_count == self.config.warning_turn() && !state.context_warned {
            state.context_warned = true;
            let n = state.next_use(PhraseSlot::Context);
            actions.push(MonitorAction::Say(
                PromptKind::ContextWarning,
                self.phrases.phrase(Phrase::ContextWarning, n),
            ));
        }

        if state.awaiting_user() && state.silence(now) > self.config.max_silence() {
            state.silence_prompts += 1;
            // The prompt restarts the silence clock.
            state.last_user_input = now;
            match state.silence_prompts {
                1 => {
                    let n = state.next_use(PhraseSlot::Silence);
                    actions.push(MonitorAction::Say(
                        PromptKind::SilencePrompt,
                        self.phrases.phrase(Phrase::SilencePrompt, n),
                    ));
                }
                2 => {
                    let n = state.next_use(PhraseSlot::CheckIn);
                    actions.push(MonitorAction::Say(
                        PromptKind::CheckIn,
                        self.phrases.phrase(Phrase::CheckIn, n),
                    ));
                }
                _ => actions.push(MonitorAction::End(EndReason::NoResponse)),
            }
        }

        actions
    }

    async fn say(&self, kind: PromptKind, text: String) -> Result<()> {
        self.state.lock().note_ai_emission(&text, Instant::now());
        self.sink.send(ServerEvent::prompt(kind, text)).await
    }

    pub fn start_user_speaking(&self) {
        self.state.lock().start_user_speaking(Instant::now());
    }

    pub fn stop_user_speaking(&self) {
        self.state.lock().stop_user_speaking(Instant::now());
    }

    /// Mark inbound audio: starts speech if needed, otherwise refreshes activity
    pub fn note_user_audio(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.user_speaking {
            state.touch_user_activity(now);
        } else {
            state.start_user_speaking(now);
        }
    }

    pub fn is_user_speaking(&self) -> bool {
        self.state.lock().user_speaking
    }

    pub fn should_wait_for_user(&self) -> bool {
        let state = self.state.lock();
        let pause = state.response_pause(self.config.min_pause(), self.config.natural_break_pause());
        state.should_wait_for_user(Instant::now(), pause)
    }

    /// Pause required after the caller stops before the AI answers
    ///
    /// Shortened when the previous utterance ended on a natural break.
    pub fn response_pause(&self) -> Duration {
        self.state
            .lock()
            .response_pause(self.config.min_pause(), self.config.natural_break_pause())
    }

    pub fn should_respond_now(&self) -> bool {
        !self.is_ended() && !self.should_wait_for_user()
    }

    pub fn should_interrupt_user(&self) -> bool {
        self.state
            .lock()
            .should_interrupt_user(Instant::now(), self.config.max_user_talk_time())
    }

    pub fn user_talk_duration(&self) -> Option<Duration> {
        self.state.lock().talk_duration(Instant::now())
    }

    pub fn pending_interruption(&self) -> bool {
        self.state.lock().pending_interruption
    }

    /// Record a transcript and decide what happens next
    pub async fn handle_user_input(&self, text: &str) -> InputAnalysis {
        let analysis = InputAnalysis {
            action: if analysis::is_ending_phrase(text) {
                InputAction::EndConversation
            } else {
                InputAction::Respond
            },
            natural_break: analysis::has_natural_break(text),
            wants_to_interrupt: analysis::wants_to_interrupt(text),
            emergency_interrupt: analysis::is_emergency_interrupt(text),
        };

        self.state.lock().record_user_input(text, Instant::now());
        tracing::debug!(
            session_id = %self.session_id,
            natural_break = analysis.natural_break,
            wants_to_interrupt = analysis.wants_to_interrupt,
            "User input recorded"
        );

        if analysis.action == InputAction::EndConversation {
            self.end_conversation(EndReason::UserInitiated).await;
        }
        analysis
    }

    pub fn begin_ai_response(&self) {
        self.state.lock().begin_ai_response();
    }

    pub fn handle_ai_response_complete(&self, text: &str) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.record_ai_response(text, now);
        state.note_ai_emission(text, now);
    }

    pub fn revert_to_user(&self) {
        self.state.lock().revert_to_user(Instant::now());
    }

    /// Context window, oldest first
    pub fn context(&self) -> Vec<Turn> {
        self.state.lock().context()
    }

    pub fn recent_context(&self, turns: usize) -> Vec<Turn> {
        self.state.lock().recent_context(turns)
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.state.lock().snapshot(Instant::now())
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().is_ended()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        *self.ended.borrow()
    }

    /// Notified once with the reason the conversation ended
    pub fn subscribe_end(&self) -> watch::Receiver<Option<EndReason>> {
        self.ended.subscribe()
    }

    /// Say farewell and end; returns false if already ended
    pub async fn end_conversation(&self, reason: EndReason) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_ended() {
                return false;
            }
            state.phase = ConversationPhase::Ended;
            state.user_speaking = false;
            state.ai_speaking = false;
        }

        let farewell = self.phrases.phrase(Phrase::Farewell(reason), 0);
        if let Err(e) = self.say(PromptKind::Farewell, farewell).await {
            tracing::debug!(session_id = %self.session_id, error = %e, "Farewell not delivered");
        }

        self.ended.send_replace(Some(reason));
        self.stop_monitor();
        tracing::info!(session_id = %self.session_id, reason = %reason, "Conversation ended");
        true
    }

    /// End silently, used when the transport is already gone
    pub fn close(&self, reason: EndReason) {
        let newly_ended = {
            let mut state = self.state.lock();
            let was_ended = state.is_ended();
            state.phase = ConversationPhase::Ended;
            !was_ended
        };
        if newly_ended {
            self.ended.send_replace(Some(reason));
        }
        self.stop_monitor();
    }
}

impl Drop for TurnTaking {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}
