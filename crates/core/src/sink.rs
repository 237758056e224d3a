//! Outbound event delivery

use crate::error::{Error, Result};
use crate::events::ServerEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Destination for events addressed to one caller
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    /// Deliver an event; fails with [`Error::Transport`] once the caller is gone
    async fn send(&self, event: ServerEvent) -> Result<()>;
}

/// Sink backed by a bounded channel drained by the connection writer
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ServerEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver that drains it
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, event: ServerEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| Error::Transport(format!("receiver dropped before {}", e.0.kind())))
    }
}
