//! Interrupt coordination
//!
//! Tracks, per session, the one AI task (inference or synthesis) currently
//! allowed to run, and cancels it on request. Cancellation only signals the
//! task's token; the orchestrator observes the signal and gives up on the
//! task after a grace period if it keeps running.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use voice_call_core::{EventSink, ServerEvent};

pub const INTERRUPTED_MESSAGE: &str = "AI response interrupted";

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Kind of cancellable AI work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Waiting on the language model
    Inference,
    /// Waiting on the speech synthesizer
    Synthesis,
}

/// Identity and cancellation handle of one in-flight task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight {
    kind: TaskKind,
    handle: TaskHandle,
}

struct SessionEntry {
    sink: Arc<dyn EventSink>,
    in_flight: Option<InFlight>,
    interrupted: bool,
    interrupts: u64,
}

/// Registry of cancellable AI work across all sessions
#[derive(Default)]
pub struct InterruptCoordinator {
    sessions: DashMap<String, SessionEntry>,
}

impl InterruptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a session; interruption notices go to `sink`
    pub fn register_session(&self, session_id: &str, sink: Arc<dyn EventSink>) {
        self.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                sink,
                in_flight: None,
                interrupted: false,
                interrupts: 0,
            },
        );
    }

    /// Forget a session, cancelling whatever it had in flight
    pub fn unregister_session(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, entry)) => {
                if let Some(task) = entry.in_flight {
                    task.handle.token.cancel();
                }
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Register or clear the inference task of a session
    pub fn set_thinking(&self, session_id: &str, active: bool, handle: &TaskHandle) -> bool {
        self.set_task(session_id, TaskKind::Inference, active, handle)
    }

    /// Register or clear the synthesis task of a session
    pub fn set_speaking(&self, session_id: &str, active: bool, handle: &TaskHandle) -> bool {
        self.set_task(session_id, TaskKind::Synthesis, active, handle)
    }

    /// Returns false if the session is unknown
    pub fn set_task(
        &self,
        session_id: &str,
        kind: TaskKind,
        active: bool,
        handle: &TaskHandle,
    ) -> bool {
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return false;
        };

        if active {
            let previous = entry.in_flight.replace(InFlight {
                kind,
                handle: handle.clone(),
            });
            if let Some(previous) = previous {
                if previous.handle.id != handle.id {
                    tracing::warn!(
                        session_id,
                        previous = ?previous.kind,
                        next = ?kind,
                        "Replacing in-flight task, cancelling the previous one"
                    );
                    previous.handle.token.cancel();
                }
            }
        } else if entry
            .in_flight
            .as_ref()
            .is_some_and(|task| task.handle.id == handle.id)
        {
            entry.in_flight = None;
        }
        true
    }

    pub fn is_thinking(&self, session_id: &str) -> bool {
        self.in_flight_kind(session_id) == Some(TaskKind::Inference)
    }

    pub fn is_speaking(&self, session_id: &str) -> bool {
        self.in_flight_kind(session_id) == Some(TaskKind::Synthesis)
    }

    pub fn in_flight_kind(&self, session_id: &str) -> Option<TaskKind> {
        self.sessions
            .get(session_id)
            .and_then(|entry| entry.in_flight.as_ref().map(|task| task.kind))
    }

    pub fn has_in_flight(&self, session_id: &str) -> bool {
        self.in_flight_kind(session_id).is_some()
    }

    /// Cancel the session's in-flight task
    ///
    /// Returns false, doing nothing, when no task is registered. On success
    /// exactly one interruption notice is sent to the session's sink.
    pub async fn interrupt(&self, session_id: &str) -> bool {
        let (task, sink) = {
            let Some(mut entry) = self.sessions.get_mut(session_id) else {
                return false;
            };
            let Some(task) = entry.in_flight.take() else {
                return false;
            };
            entry.interrupted = true;
            entry.interrupts += 1;
            (task, entry.sink.clone())
        };

        task.handle.token.cancel();
        tracing::info!(session_id, kind = ?task.kind, "AI task interrupted");

        let notice = ServerEvent::InterruptConfirmed {
            message: INTERRUPTED_MESSAGE.to_string(),
        };
        if let Err(e) = sink.send(notice).await {
            tracing::debug!(session_id, error = %e, "Interrupt notice not delivered");
        }
        true
    }

    pub fn is_interrupted(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|entry| entry.interrupted)
    }

    pub fn clear_interrupt(&self, session_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.interrupted = false;
        }
    }

    /// Successful interruptions since registration
    pub fn interrupt_count(&self, session_id: &str) -> u64 {
        self.sessions
            .get(session_id)
            .map_or(0, |entry| entry.interrupts)
    }
}
