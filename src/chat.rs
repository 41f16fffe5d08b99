//! Text chat over the signaling channel
//!
//! Fire and forget: no acknowledgement, no retry. Messages sent locally are
//! shown right away.

use crate::error::{Error, Result};
use crate::signaling::{Outbound, SignalingChannel};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    #[serde(rename = "self")]
    Local,
    Peer,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub origin: Origin,
    pub text: String,
    pub arrival_order: u64,
    pub received_at: DateTime<Utc>,
}

/// Append-only log for the current call
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    next_order: u64,
}

/// Extracts the text of an inbound chat payload
pub fn chat_text(payload: &Value) -> Result<&str> {
    payload
        .as_object()
        .ok_or_else(|| Error::InvalidMessagePayload("chat payload is not an object".into()))?
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidMessagePayload("chat text is not a string".into()))
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `text` to `remote` and echoes it locally.
    ///
    /// Blank input is ignored (`Ok(None)`).
    pub fn send(
        &mut self,
        text: &str,
        remote: Option<&str>,
        channel: &dyn SignalingChannel,
    ) -> Result<Option<ChatMessage>> {
        if text.trim().is_empty() {
            debug!("ignoring blank chat message");
            return Ok(None);
        }
        let to = remote.ok_or(Error::NoRemoteParticipant)?;
        channel.send(Outbound::ChatMessage {
            to: to.to_owned(),
            text: text.to_owned(),
        })?;
        Ok(Some(self.append(Origin::Local, text)))
    }

    /// Appends a valid inbound message; anything else is dropped
    pub fn on_incoming(&mut self, payload: &Value) -> Option<ChatMessage> {
        match chat_text(payload) {
            Ok(text) => Some(self.append(Origin::Peer, text)),
            Err(e) => {
                warn!("dropping chat message: {}", e);
                None
            }
        }
    }

    fn append(&mut self, origin: Origin, text: &str) -> ChatMessage {
        self.next_order += 1;
        let message = ChatMessage {
            origin,
            text: text.to_owned(),
            arrival_order: self.next_order,
            received_at: Utc::now(),
        };
        self.messages.push(message.clone());
        message
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.next_order = 0;
    }
}
