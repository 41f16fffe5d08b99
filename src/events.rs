//! Notifications a session raises for whoever renders it

use crate::chat::ChatMessage;
use crate::peer::{ConnectionState, RemoteTrack};
use crate::session::{CallState, EndReason};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RemotePresent { id: String, display_name: String },
    RemoteAbsent { id: String },
    StateChanged(CallState),
    Connected { remote: String },
    Ended(EndReason),
    RemoteTrackAdded(RemoteTrack),
    RemoteTrackRemoved(RemoteTrack),
    ScreenShareChanged(bool),
    Chat(ChatMessage),
    /// Media path trouble reported by the transport
    ConnectionProblem(ConnectionState),
    ConnectionRecovered,
    Error(String),
}

/// Outlet for [`SessionEvent`]s. Events are dropped when nobody listens.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SessionEvent) {
        debug!("session event: {:?}", event);
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
