//! WebSocket Handler
//!
//! One socket carries one call. Inbound JSON frames are [`ClientEvent`]s;
//! everything the call produces reaches the socket as [`ServerEvent`]s
//! through a channel drained by a writer task.
//!
//! The end of an utterance is either signalled by the client with
//! `user_stop_speaking` or inferred once no audio has arrived for the
//! minimum pause. Either way buffered audio is flushed as a turn after the
//! pause has elapsed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;

use voice_call_core::{
    CallSettingsUpdate, ChannelSink, ClientEvent, EndReason, EventSink, ServerEvent,
};

use crate::session::{Session, SessionManager, TurnStart};
use crate::state::AppState;

const OUTBOUND_CAPACITY: usize = 64;
const WRITER_DRAIN: Duration = Duration::from_secs(1);
/// Added to the pause so the inclusive wait boundary has passed
const PAUSE_SLACK: Duration = Duration::from_millis(10);

pub const SETTINGS_UPDATED: &str = "Settings updated";
pub const NO_SESSION: &str = "No active session";

/// Whether the connection should keep reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Protocol state of one connection, independent of the socket
pub struct CallConnection {
    manager: Arc<SessionManager>,
    sink: Arc<dyn EventSink>,
    session: Option<Arc<Session>>,
    flush_at: Option<Instant>,
    last_inbound: Instant,
}

impl CallConnection {
    pub fn new(manager: Arc<SessionManager>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            manager,
            sink,
            session: None,
            flush_at: None,
            last_inbound: Instant::now(),
        }
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref().filter(|s| s.is_active())
    }

    /// When the pending pause check is due
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_at
    }

    pub fn idle_for(&self) -> Duration {
        self.last_inbound.elapsed()
    }

    /// Parse and handle one text frame
    pub async fn handle_text(&mut self, text: &str) -> Flow {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed client message");
                self.reply(ServerEvent::error(format!("Invalid message: {}", e), None))
                    .await
            }
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) -> Flow {
        self.last_inbound = Instant::now();
        match event {
            ClientEvent::SessionStart { settings } => self.start(settings).await,
            ClientEvent::AudioData { audio_data } => match BASE64.decode(audio_data.as_bytes()) {
                Ok(bytes) => self.handle_audio(bytes).await,
                Err(e) => {
                    self.reply(ServerEvent::error(format!("Invalid audio data: {}", e), None))
                        .await
                }
            },
            ClientEvent::UserStopSpeaking => {
                let Some(session) = self.session().cloned() else {
                    return self.no_session().await;
                };
                self.manager.user_stopped_speaking(&session);
                self.flush_at = Some(Instant::now() + self.pause());
                Flow::Continue
            }
            ClientEvent::Interrupt => {
                let Some(id) = self.session().map(|s| s.id.clone()) else {
                    return self.no_session().await;
                };
                match self.manager.interrupt(&id).await {
                    Ok(stopped) => {
                        tracing::debug!(session_id = %id, stopped, "Client interrupt");
                        Flow::Continue
                    }
                    Err(e) => self.reply(ServerEvent::error(e.to_string(), None)).await,
                }
            }
            ClientEvent::SettingsUpdate { settings } => {
                let Some(session) = self.session().cloned() else {
                    return self.no_session().await;
                };
                let applied = session.apply_settings(settings);
                tracing::info!(session_id = %session.id, settings = ?applied, "Settings updated");
                self.reply(ServerEvent::status(SETTINGS_UPDATED)).await
            }
            ClientEvent::SessionEnd => {
                self.end(EndReason::SessionEnd).await;
                Flow::Close
            }
            ClientEvent::Ping => self.reply(ServerEvent::Pong).await,
        }
    }

    /// Raw audio, from a binary frame or a decoded `audio_data` event
    pub async fn handle_audio(&mut self, bytes: Vec<u8>) -> Flow {
        self.last_inbound = Instant::now();
        let Some(session) = self.session().cloned() else {
            return self.no_session().await;
        };
        match self.manager.handle_audio(&session, bytes).await {
            TurnStart::Inactive => Flow::Close,
            _ => {
                self.flush_at = Some(Instant::now() + self.manager.turn_config().min_pause());
                Flow::Continue
            }
        }
    }

    /// The flush deadline passed without new audio
    pub async fn on_flush_deadline(&mut self) -> TurnStart {
        self.flush_at = None;
        let Some(session) = self.session().cloned() else {
            return TurnStart::Inactive;
        };

        let turn_taking = session.turn_taking();
        if turn_taking.is_user_speaking() {
            // Audio went quiet without an explicit stop
            self.manager.user_stopped_speaking(&session);
            self.flush_at = Some(Instant::now() + self.pause());
            return TurnStart::Waiting;
        }

        let started = self.manager.flush_after_pause(&session);
        if matches!(started, TurnStart::Busy | TurnStart::Waiting) {
            self.flush_at = Some(Instant::now() + self.pause());
        }
        started
    }

    /// End the session, if any; true when this call ended it
    pub async fn end(&mut self, reason: EndReason) -> bool {
        self.flush_at = None;
        match self.session.take() {
            Some(session) => self.manager.end_session(&session.id, reason).await,
            None => false,
        }
    }

    async fn start(&mut self, settings: CallSettingsUpdate) -> Flow {
        if self.session().is_some() {
            return self
                .reply(ServerEvent::error("Session already started", None))
                .await;
        }
        match self
            .manager
            .create_session(settings, self.sink.clone())
            .await
        {
            Ok(session) => {
                self.session = Some(session);
                Flow::Continue
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create session");
                self.reply(ServerEvent::error(e.to_string(), None)).await
            }
        }
    }

    fn pause(&self) -> Duration {
        let pause = match self.session() {
            Some(session) => session.turn_taking().response_pause(),
            None => self.manager.turn_config().min_pause(),
        };
        pause + PAUSE_SLACK
    }

    async fn no_session(&self) -> Flow {
        self.reply(ServerEvent::error(NO_SESSION, None)).await
    }

    async fn reply(&self, event: ServerEvent) -> Flow {
        match self.sink.send(event).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Close,
        }
    }
}

/// WebSocket handler
pub struct WebSocketHandler;

impl WebSocketHandler {
    /// Handle WebSocket upgrade
    pub async fn handle(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
        ws.on_upgrade(move |socket| Self::handle_socket(socket, state))
    }

    /// Handle WebSocket connection
    async fn handle_socket(socket: WebSocket, state: AppState) {
        let (mut sender, mut receiver) = socket.split();
        let (sink, mut events) = ChannelSink::channel(OUTBOUND_CAPACITY);
        let sink: Arc<dyn EventSink> = Arc::new(sink);

        let mut writer = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(kind = event.kind(), error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sender.close().await;
        });

        let ping_interval = Duration::from_millis(state.config.server.ping_interval_ms.max(1));
        let mut ping = tokio::time::interval(ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await;

        let mut call = CallConnection::new(state.sessions.clone(), sink.clone());
        let mut ended: Option<watch::Receiver<Option<EndReason>>> = None;
        let span = tracing::info_span!("session", session_id = tracing::field::Empty);

        async {
            loop {
                if ended.is_none() {
                    if let Some(session) = call.session() {
                        tracing::Span::current().record("session_id", session.id.as_str());
                        ended = Some(session.subscribe_end());
                    }
                }
                let flush_at = call.flush_deadline();

                tokio::select! {
                    msg = receiver.next() => {
                        let flow = match msg {
                            Some(Ok(Message::Text(text))) => call.handle_text(&text).await,
                            Some(Ok(Message::Binary(bytes))) => call.handle_audio(bytes).await,
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Flow::Continue,
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("WebSocket closed by client");
                                Flow::Close
                            }
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "WebSocket error");
                                Flow::Close
                            }
                        };
                        if flow == Flow::Close {
                            break;
                        }
                    }
                    reason = conversation_ended(&mut ended) => {
                        call.end(reason).await;
                        break;
                    }
                    _ = sleep_until(flush_at) => {
                        call.on_flush_deadline().await;
                    }
                    _ = ping.tick() => {
                        if call.idle_for() >= ping_interval && sink.send(ServerEvent::Ping).await.is_err() {
                            break;
                        }
                    }
                }
            }

            if call.end(EndReason::Disconnected).await {
                tracing::info!("Session torn down after disconnect");
            }
        }
        .instrument(span)
        .await;

        drop(call);
        drop(sink);
        if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }
    }
}

/// Resolves with the end reason once the conversation ends on its own
async fn conversation_ended(ended: &mut Option<watch::Receiver<Option<EndReason>>>) -> EndReason {
    let Some(rx) = ended.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        if let Some(reason) = *rx.borrow_and_update() {
            return reason;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
