//! Signaling channel messages and subscriptions
//!
//! Everything the two peers say to each other goes through the relay as
//! `{"event": <name>, "payload": {...}}`. Media never does.

pub mod relay;

use crate::error::{Error, Result};
use crate::peer::SessionDescription;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Inbound event kinds a session can listen for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    ParticipantJoined,
    ParticipantLeft,
    CallOffer,
    CallAnswer,
    RenegoOffer,
    RenegoAnswer,
    ChatMessage,
    CallEnd,
    Disconnected,
}

impl EventName {
    pub const ALL: [EventName; 9] = [
        EventName::ParticipantJoined,
        EventName::ParticipantLeft,
        EventName::CallOffer,
        EventName::CallAnswer,
        EventName::RenegoOffer,
        EventName::RenegoAnswer,
        EventName::ChatMessage,
        EventName::CallEnd,
        EventName::Disconnected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::ParticipantJoined => "participant-joined",
            EventName::ParticipantLeft => "participant-left",
            EventName::CallOffer => "call-offer",
            EventName::CallAnswer => "call-answer",
            EventName::RenegoOffer => "renego-offer",
            EventName::RenegoAnswer => "renego-answer",
            EventName::ChatMessage => "chat-message",
            EventName::CallEnd => "call-end",
            EventName::Disconnected => "disconnected",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

/// Messages this client sends to the relay
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Outbound {
    JoinRoom {
        room_id: String,
        display_name: String,
    },
    CallOffer {
        to: String,
        offer: SessionDescription,
    },
    CallAnswer {
        to: String,
        answer: SessionDescription,
    },
    RenegoOffer {
        to: String,
        offer: SessionDescription,
    },
    RenegoAnswer {
        to: String,
        answer: SessionDescription,
    },
    ChatMessage {
        to: String,
        text: String,
    },
    CallEnd {
        to: String,
    },
    LeaveRoom {
        room_id: String,
    },
}

impl Outbound {
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Addressee of a directed message
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Outbound::CallOffer { to, .. }
            | Outbound::CallAnswer { to, .. }
            | Outbound::RenegoOffer { to, .. }
            | Outbound::RenegoAnswer { to, .. }
            | Outbound::ChatMessage { to, .. }
            | Outbound::CallEnd { to } => Some(to.as_str()),
            Outbound::JoinRoom { .. } | Outbound::LeaveRoom { .. } => None,
        }
    }
}

/// Messages the relay delivers to this client
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    ParticipantJoined { id: String, display_name: String },
    ParticipantLeft { id: String, display_name: String },
    CallOffer { from: String, offer: SessionDescription },
    CallAnswer { from: String, answer: SessionDescription },
    RenegoOffer { from: String, offer: SessionDescription },
    RenegoAnswer { from: String, answer: SessionDescription },
    /// Chat payload is validated by the chat log, not here
    ChatMessage { from: String, payload: Value },
    CallEnd { from: String },
    Disconnected,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresencePayload {
    id: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Deserialize)]
struct OfferPayload {
    from: String,
    offer: SessionDescription,
}

#[derive(Deserialize)]
struct AnswerPayload {
    from: String,
    answer: SessionDescription,
}

#[derive(Deserialize)]
struct FromPayload {
    from: String,
}

#[derive(Deserialize)]
struct WireMessage {
    event: String,
    #[serde(default)]
    payload: Value,
}

fn payload<T: for<'de> Deserialize<'de>>(event: EventName, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::InvalidMessagePayload(format!("{}: {}", event.as_str(), e)))
}

impl Inbound {
    pub fn event(&self) -> EventName {
        match self {
            Inbound::ParticipantJoined { .. } => EventName::ParticipantJoined,
            Inbound::ParticipantLeft { .. } => EventName::ParticipantLeft,
            Inbound::CallOffer { .. } => EventName::CallOffer,
            Inbound::CallAnswer { .. } => EventName::CallAnswer,
            Inbound::RenegoOffer { .. } => EventName::RenegoOffer,
            Inbound::RenegoAnswer { .. } => EventName::RenegoAnswer,
            Inbound::ChatMessage { .. } => EventName::ChatMessage,
            Inbound::CallEnd { .. } => EventName::CallEnd,
            Inbound::Disconnected => EventName::Disconnected,
        }
    }

    /// Decodes one relay frame
    pub fn from_wire(text: &str) -> Result<Self> {
        let msg: WireMessage = serde_json::from_str(text)
            .map_err(|e| Error::InvalidMessagePayload(e.to_string()))?;
        let event = EventName::parse(&msg.event).ok_or_else(|| {
            Error::InvalidMessagePayload(format!("unknown event {}", msg.event))
        })?;
        Self::from_payload(event, msg.payload)
    }

    pub fn from_payload(event: EventName, value: Value) -> Result<Self> {
        let inbound = match event {
            EventName::ParticipantJoined => {
                let p: PresencePayload = payload(event, value)?;
                Inbound::ParticipantJoined {
                    id: p.id,
                    display_name: p.display_name,
                }
            }
            EventName::ParticipantLeft => {
                let p: PresencePayload = payload(event, value)?;
                Inbound::ParticipantLeft {
                    id: p.id,
                    display_name: p.display_name,
                }
            }
            EventName::CallOffer => {
                let p: OfferPayload = payload(event, value)?;
                Inbound::CallOffer {
                    from: p.from,
                    offer: p.offer,
                }
            }
            EventName::RenegoOffer => {
                let p: OfferPayload = payload(event, value)?;
                Inbound::RenegoOffer {
                    from: p.from,
                    offer: p.offer,
                }
            }
            EventName::CallAnswer => {
                let p: AnswerPayload = payload(event, value)?;
                Inbound::CallAnswer {
                    from: p.from,
                    answer: p.answer,
                }
            }
            EventName::RenegoAnswer => {
                let p: AnswerPayload = payload(event, value)?;
                Inbound::RenegoAnswer {
                    from: p.from,
                    answer: p.answer,
                }
            }
            EventName::ChatMessage => {
                let from = value
                    .get("from")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        Error::InvalidMessagePayload("chat-message: missing sender".into())
                    })?;
                Inbound::ChatMessage {
                    from,
                    payload: value,
                }
            }
            EventName::CallEnd => {
                let p: FromPayload = payload(event, value)?;
                Inbound::CallEnd { from: p.from }
            }
            EventName::Disconnected => Inbound::Disconnected,
        };
        Ok(inbound)
    }
}

/// Opaque id of one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Duplex connection to the signaling relay
pub trait SignalingChannel: Send + Sync {
    /// Id the relay knows this client by
    fn participant_id(&self) -> &str;

    fn send(&self, message: Outbound) -> Result<()>;

    /// Routes every inbound `event` into `sink` until unsubscribed
    fn subscribe(&self, event: EventName, sink: mpsc::UnboundedSender<Inbound>)
        -> Result<ListenerId>;

    fn unsubscribe(&self, id: ListenerId);
}

/// A registered listener; dropping it unsubscribes
pub struct Subscription {
    id: ListenerId,
    event: EventName,
    channel: Arc<dyn SignalingChannel>,
}

impl Subscription {
    pub fn register(
        channel: &Arc<dyn SignalingChannel>,
        event: EventName,
        sink: mpsc::UnboundedSender<Inbound>,
    ) -> Result<Self> {
        let id = channel.subscribe(event, sink)?;
        Ok(Self {
            id,
            event,
            channel: Arc::clone(channel),
        })
    }

    pub fn event(&self) -> EventName {
        self.event
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("unsubscribing from {}", self.event.as_str());
        self.channel.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_wire_shape() {
        let join = Outbound::JoinRoom {
            room_id: "42".into(),
            display_name: "alice".into(),
        };
        let value: Value = serde_json::from_str(&join.to_wire().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "join-room", "payload": {"roomId": "42", "displayName": "alice"}})
        );

        let offer = Outbound::RenegoOffer {
            to: "b".into(),
            offer: SessionDescription::offer("v=0"),
        };
        let value: Value = serde_json::from_str(&offer.to_wire().unwrap()).unwrap();
        assert_eq!(value["event"], "renego-offer");
        assert_eq!(value["payload"]["offer"]["type"], "offer");
        assert_eq!(offer.recipient(), Some("b"));
    }

    #[test]
    fn test_inbound_from_wire() {
        let msg = Inbound::from_wire(
            r#"{"event":"participant-joined","payload":{"id":"p1","displayName":"bob"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Inbound::ParticipantJoined {
                id: "p1".into(),
                display_name: "bob".into()
            }
        );

        let msg = Inbound::from_wire(
            r#"{"event":"call-answer","payload":{"from":"p1","answer":{"type":"answer","sdp":"x"}}}"#,
        )
        .unwrap();
        assert_eq!(msg.event(), EventName::CallAnswer);

        let msg = Inbound::from_wire(r#"{"event":"disconnected"}"#).unwrap();
        assert_eq!(msg, Inbound::Disconnected);
    }

    #[test]
    fn test_chat_payload_is_kept_raw() {
        let msg =
            Inbound::from_wire(r#"{"event":"chat-message","payload":{"from":"p1","text":42}}"#)
                .unwrap();
        match msg {
            Inbound::ChatMessage { from, payload } => {
                assert_eq!(from, "p1");
                assert_eq!(payload["text"], 42);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        for frame in [
            "not json",
            r#"{"event":"nope","payload":{}}"#,
            r#"{"event":"call-offer","payload":{"from":"p1"}}"#,
            r#"{"event":"participant-left","payload":{}}"#,
        ] {
            assert!(matches!(
                Inbound::from_wire(frame),
                Err(Error::InvalidMessagePayload(_))
            ));
        }
    }
}
