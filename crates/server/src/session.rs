//! Session Management
//!
//! A [`Session`] aggregates everything one call owns: the call record, the
//! inbound audio buffer and the turn-taking state machine. Sessions are only
//! created, looked up and torn down through the [`SessionManager`].
//!
//! Turns of one session run strictly one after another. A turn holds the
//! session's turn lock for its whole duration; audio arriving meanwhile keeps
//! accumulating in the buffer and is picked up once the lock is released and
//! the caller has paused.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedMutexGuard};
use tokio::time::Instant;

use voice_call_config::{AudioBufferConfig, Settings, TurnTakingConfig};
use voice_call_core::{
    CallSession, CallSettings, CallSettingsUpdate, ConversationMetadata, ConversationStore,
    EndReason, EventSink, ServerEvent,
};
use voice_call_pipeline::{
    metrics as pipeline_metrics, AudioBuffer, ConversationSnapshot, InterruptCoordinator,
    PhraseProvider, PipelineOrchestrator, TurnScope, TurnTaking,
};

use crate::ServerError;

pub const BUSY_MESSAGE: &str = "AI is still responding, please wait...";
pub const DEFERRED_MESSAGE: &str = "Processing...";

const ACTIVE_SESSIONS: &str = "voice_call_active_sessions";
const PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Session state
pub struct Session {
    /// Session ID
    pub id: String,
    call: Mutex<CallSession>,
    buffer: Mutex<AudioBuffer>,
    turn_taking: Arc<TurnTaking>,
    sink: Arc<dyn EventSink>,
    turn_lock: Arc<tokio::sync::Mutex<()>>,
    /// Last inbound activity
    last_activity: Mutex<Instant>,
    last_turn_end: Mutex<Option<Instant>>,
    /// A stop phrase check over barge-in audio is running
    stop_check: AtomicBool,
    torn_down: AtomicBool,
}

impl Session {
    fn new(
        id: String,
        settings: CallSettings,
        audio: &AudioBufferConfig,
        turn_taking: Arc<TurnTaking>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let mut call = CallSession::new(id.clone(), settings);
        call.connect();
        Self {
            id,
            call: Mutex::new(call),
            buffer: Mutex::new(AudioBuffer::new(audio)),
            turn_taking,
            sink,
            turn_lock: Arc::new(tokio::sync::Mutex::new(())),
            last_activity: Mutex::new(Instant::now()),
            last_turn_end: Mutex::new(None),
            stop_check: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Update last activity
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Check if session is expired
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.lock().elapsed() > timeout
    }

    /// False once teardown has started
    pub fn is_active(&self) -> bool {
        !self.torn_down.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> CallSettings {
        self.call.lock().settings.clone()
    }

    /// Merge a partial settings patch into the live call
    pub fn apply_settings(&self, update: CallSettingsUpdate) -> CallSettings {
        let mut call = self.call.lock();
        call.settings.apply(update);
        call.settings.clone()
    }

    pub fn turn_taking(&self) -> &Arc<TurnTaking> {
        &self.turn_taking
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.turn_taking.snapshot()
    }

    /// Copy of the call record with its turn history
    pub fn call(&self) -> CallSession {
        self.call.lock().clone()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.lock().buffered_bytes()
    }

    pub fn is_turn_running(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    /// Receiver notified when the conversation ends on its own
    pub fn subscribe_end(&self) -> watch::Receiver<Option<EndReason>> {
        self.turn_taking.subscribe_end()
    }

    fn mark_turn_end(&self) {
        *self.last_turn_end.lock() = Some(Instant::now());
    }

    /// Time left before another turn may start
    fn rate_limit_wait(&self, interval: Duration) -> Option<Duration> {
        let last = (*self.last_turn_end.lock())?;
        interval
            .checked_sub(last.elapsed())
            .filter(|wait| !wait.is_zero())
    }
}

/// Result of asking a session to run a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStart {
    /// A turn was spawned over the drained buffer
    Started,
    /// Audio was buffered; not enough yet for a turn
    Buffering,
    /// The user may still be talking
    Waiting,
    /// Too little audio to be worth recognizing
    Insufficient,
    /// The previous turn is still running
    Busy,
    /// The session is ending or gone
    Inactive,
}

/// Session manager
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    orchestrator: Arc<PipelineOrchestrator>,
    phrases: Arc<dyn PhraseProvider>,
    store: Option<Arc<dyn ConversationStore>>,
    turn_config: TurnTakingConfig,
    audio_config: AudioBufferConfig,
    max_sessions: usize,
    session_timeout: Duration,
    cleanup_interval: Duration,
}

impl SessionManager {
    pub fn new(
        settings: &Settings,
        orchestrator: Arc<PipelineOrchestrator>,
        phrases: Arc<dyn PhraseProvider>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            orchestrator,
            phrases,
            store: None,
            turn_config: settings.turn_taking.clone(),
            audio_config: settings.audio.clone(),
            max_sessions: settings.server.max_sessions,
            session_timeout: settings.turn_taking.conversation_timeout() * 2,
            cleanup_interval: Duration::from_secs(settings.server.cleanup_interval_secs.max(1)),
        }
    }

    /// Persist each conversation to `store` at teardown
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn coordinator(&self) -> &Arc<InterruptCoordinator> {
        self.orchestrator.coordinator()
    }

    pub fn turn_config(&self) -> &TurnTakingConfig {
        &self.turn_config
    }

    pub fn audio_config(&self) -> &AudioBufferConfig {
        &self.audio_config
    }

    /// Start a background task that periodically ends expired sessions.
    ///
    /// Returns a shutdown sender that stops the task. Sessions idle longer
    /// than twice the conversation timeout end with [`EndReason::Expired`].
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = manager.cleanup_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let removed = manager.cleanup_expired().await;
                        if removed > 0 {
                            tracing::info!(
                                removed,
                                remaining = manager.count(),
                                "Session cleanup: ended expired sessions"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Create a session, greet the caller and start its monitor
    pub async fn create_session(
        &self,
        update: CallSettingsUpdate,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<Session>, ServerError> {
        let mut settings = CallSettings::default();
        settings.apply(update);
        let kid_friendly = settings.kid_friendly;

        let id = uuid::Uuid::new_v4().to_string();
        let session = {
            let mut sessions = self.sessions.write();
            if sessions.len() >= self.max_sessions {
                return Err(ServerError::Capacity(self.max_sessions));
            }

            let turn_taking = TurnTaking::new(
                id.clone(),
                self.turn_config.clone(),
                self.phrases.clone(),
                sink.clone(),
            );
            let session = Arc::new(Session::new(
                id.clone(),
                settings,
                &self.audio_config,
                turn_taking,
                sink.clone(),
            ));
            self.coordinator().register_session(&id, sink);
            sessions.insert(id.clone(), session.clone());
            metrics::gauge!(ACTIVE_SESSIONS).set(sessions.len() as f64);
            session
        };

        let started = ServerEvent::SessionStarted {
            session_id: id.clone(),
        };
        let greeted = match session.sink.send(started).await {
            Ok(()) => session.turn_taking.start_conversation(kid_friendly).await,
            Err(e) => Err(e),
        };
        if let Err(e) = greeted {
            self.end_session(&id, EndReason::Disconnected).await;
            return Err(e.into());
        }

        tracing::info!(session_id = %id, kid_friendly, "Created session");
        Ok(session)
    }

    /// Get a live session by ID
    pub fn get_session(&self, id: &str) -> Result<Arc<Session>, ServerError> {
        self.sessions
            .read()
            .get(id)
            .filter(|session| session.is_active())
            .cloned()
            .ok_or_else(|| ServerError::SessionNotFound(id.to_string()))
    }

    /// End a session and run its teardown
    ///
    /// Safe to call from every teardown path; only the first call has any
    /// effect and returns true.
    pub async fn end_session(&self, id: &str, reason: EndReason) -> bool {
        let removed = self.sessions.write().remove(id);
        let Some(session) = removed else {
            return false;
        };
        metrics::gauge!(ACTIVE_SESSIONS).set(self.count() as f64);
        self.teardown(&session, reason).await
    }

    async fn teardown(&self, session: &Session, reason: EndReason) -> bool {
        if session.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        let turn_taking = &session.turn_taking;
        if reason == EndReason::Disconnected || turn_taking.is_ended() {
            turn_taking.close(reason);
        } else {
            turn_taking.end_conversation(reason).await;
        }
        let reason = turn_taking.end_reason().unwrap_or(reason);

        self.coordinator().unregister_session(&session.id);
        session.buffer.lock().clear();

        let (turns, metadata, summary) = {
            let mut call = session.call.lock();
            call.end();
            let metadata = ConversationMetadata {
                started_at: call.started_at,
                ended_at: call.ended_at.unwrap_or_else(chrono::Utc::now),
                end_reason: reason,
                settings: call.settings.clone(),
            };
            (call.turns().to_vec(), metadata, call.summary(reason))
        };

        if let Some(store) = &self.store {
            match tokio::time::timeout(PERSIST_TIMEOUT, store.save(&session.id, &turns, &metadata))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(session_id = %session.id, error = %e, "Failed to persist conversation")
                }
                Err(_) => {
                    tracing::error!(session_id = %session.id, "Persisting conversation timed out")
                }
            }
        }

        let turn_count = summary.turns;
        if let Err(e) = session.sink.send(ServerEvent::SessionEnded { summary }).await {
            tracing::debug!(session_id = %session.id, error = %e, "Session summary not delivered");
        }

        tracing::info!(
            session_id = %session.id,
            reason = %reason,
            turns = turn_count,
            "Session ended"
        );
        true
    }

    /// Feed one inbound audio chunk to a session
    ///
    /// Audio only accumulates while the caller may still be talking; the
    /// turn starts once the pause has elapsed, normally from
    /// [`Self::flush_after_pause`]. Audio arriving while an AI task is in
    /// flight barges in on it when the caller keeps talking or says a stop
    /// phrase.
    pub async fn handle_audio(self: &Arc<Self>, session: &Arc<Session>, chunk: Vec<u8>) -> TurnStart {
        if !session.is_active() || session.turn_taking.is_ended() {
            return TurnStart::Inactive;
        }
        session.touch();
        session.turn_taking.note_user_audio();
        self.check_barge_in(session).await;

        let ready = session.buffer.lock().add_chunk(chunk);
        if !ready {
            return TurnStart::Buffering;
        }
        if session.is_turn_running() {
            self.check_stop_phrase(session);
            self.send_busy(session).await;
            return TurnStart::Busy;
        }
        if !session.turn_taking.should_respond_now() {
            return TurnStart::Waiting;
        }

        let started = self.start_turn(session, 0);
        if started == TurnStart::Busy {
            self.send_busy(session).await;
        }
        started
    }

    async fn send_busy(&self, session: &Session) {
        if let Err(e) = session.sink.send(ServerEvent::status(BUSY_MESSAGE)).await {
            tracing::debug!(session_id = %session.id, error = %e, "Busy status not delivered");
        }
    }

    /// Caller signalled the end of an utterance
    pub fn user_stopped_speaking(&self, session: &Session) {
        session.touch();
        session.turn_taking.stop_user_speaking();
    }

    /// Run whatever is buffered once the caller has paused long enough
    pub fn flush_after_pause(self: &Arc<Self>, session: &Arc<Session>) -> TurnStart {
        if !session.is_active() {
            return TurnStart::Inactive;
        }
        if !session.turn_taking.should_respond_now() {
            return TurnStart::Waiting;
        }
        self.start_turn(session, self.audio_config.min_processable_bytes)
    }

    /// Cancel the session's in-flight AI task; false when there is none
    pub async fn interrupt(&self, id: &str) -> Result<bool, ServerError> {
        let session = self.get_session(id)?;
        session.touch();
        let stopped = self.coordinator().interrupt(&session.id).await;
        if stopped {
            pipeline_metrics::record_interrupt();
        }
        Ok(stopped)
    }

    async fn check_barge_in(&self, session: &Session) -> bool {
        let turn_taking = &session.turn_taking;
        if !session.settings().interrupt_detection {
            return false;
        }
        // The talk-duration check owns long speech; audio must not race it.
        if turn_taking.pending_interruption() || turn_taking.should_interrupt_user() {
            return false;
        }
        let talking = turn_taking
            .user_talk_duration()
            .is_some_and(|talk| talk >= self.turn_config.barge_in_after());
        if !talking || !self.coordinator().has_in_flight(&session.id) {
            return false;
        }

        let stopped = self.coordinator().interrupt(&session.id).await;
        if stopped {
            pipeline_metrics::record_interrupt();
            tracing::info!(session_id = %session.id, "User barged in on AI response");
        }
        stopped
    }

    /// Recognize audio buffered during a running turn and stop the AI if it
    /// holds an emergency stop phrase. At most one check runs per session.
    fn check_stop_phrase(self: &Arc<Self>, session: &Arc<Session>) {
        let settings = session.settings();
        if !settings.interrupt_detection || !self.coordinator().has_in_flight(&session.id) {
            return;
        }
        if session.stop_check.swap(true, Ordering::SeqCst) {
            return;
        }
        let audio = session.buffer.lock().snapshot();

        let manager = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            let stop = manager
                .orchestrator
                .is_emergency_stop(&session.id, &audio, &settings.language)
                .await;
            if stop && session.is_active() {
                session.buffer.lock().clear();
                if manager.coordinator().interrupt(&session.id).await {
                    pipeline_metrics::record_interrupt();
                    tracing::info!(session_id = %session.id, "Stop phrase interrupted AI response");
                }
            }
            session.stop_check.store(false, Ordering::SeqCst);
        });
    }

    fn start_turn(self: &Arc<Self>, session: &Arc<Session>, min_bytes: usize) -> TurnStart {
        if !session.is_active() || session.turn_taking.is_ended() {
            return TurnStart::Inactive;
        }
        let Ok(guard) = session.turn_lock.clone().try_lock_owned() else {
            return TurnStart::Busy;
        };

        let audio = {
            let mut buffer = session.buffer.lock();
            if buffer.is_empty() || buffer.buffered_bytes() < min_bytes {
                return TurnStart::Insufficient;
            }
            buffer.drain()
        };

        let manager = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            manager.run_turn(session, audio, guard).await;
        });
        TurnStart::Started
    }

    async fn run_turn(self: Arc<Self>, session: Arc<Session>, audio: Vec<u8>, guard: OwnedMutexGuard<()>) {
        if let Some(wait) = session.rate_limit_wait(self.orchestrator.config().min_response_interval()) {
            if let Err(e) = session.sink.send(ServerEvent::status(DEFERRED_MESSAGE)).await {
                tracing::debug!(session_id = %session.id, error = %e, "Deferred status not delivered");
            }
            tokio::time::sleep(wait).await;
        }
        if !session.is_active() {
            return;
        }

        let scope = TurnScope {
            session_id: &session.id,
            settings: session.settings(),
            call: &session.call,
            turn_taking: &session.turn_taking,
            sink: &session.sink,
        };
        let result = self.orchestrator.run_turn(scope, audio).await;
        session.mark_turn_end();
        drop(guard);

        match result {
            Ok(outcome) => {
                tracing::debug!(session_id = %session.id, ?outcome, "Turn finished");
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "Transport failed during turn");
                self.end_session(&session.id, EndReason::Disconnected).await;
                return;
            }
        }

        // Audio that arrived during the turn is answered once the caller pauses
        if self.flush_after_pause(&session) == TurnStart::Started {
            tracing::debug!(session_id = %session.id, "Started queued turn");
        }
    }

    /// End every session idle beyond the session timeout
    pub async fn cleanup_expired(&self) -> usize {
        let timeout = self.session_timeout;
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, s)| s.is_expired(timeout))
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            if self.end_session(&id, EndReason::Expired).await {
                tracing::info!(session_id = %id, "Expired session");
                removed += 1;
            }
        }
        removed
    }

    /// Get active session count
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// List all session IDs
    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// End all sessions, used on shutdown
    pub async fn end_all(&self, reason: EndReason) -> usize {
        let mut ended = 0;
        for id in self.list() {
            if self.end_session(&id, reason).await {
                ended += 1;
            }
        }
        ended
    }
}
