//! In-process signaling relay
//!
//! Implements the relay side of the protocol for clients living in the same
//! process: room membership, join/leave broadcast to the other occupants,
//! and directed delivery between members of the same room. Delivery to one
//! recipient happens in send order.

use super::{EventName, Inbound, ListenerId, Outbound, SignalingChannel};
use crate::error::{Error, Result};
use crate::utils::prefixed_id;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

struct Member {
    room: Option<String>,
    display_name: String,
    connected: bool,
}

struct Listener {
    id: ListenerId,
    owner: String,
    event: EventName,
    sink: mpsc::UnboundedSender<Inbound>,
}

#[derive(Default)]
struct RelayState {
    members: BTreeMap<String, Member>,
    listeners: Vec<Listener>,
    next_listener: u64,
    /// Recipients whose deliveries are parked until resumed
    held: HashMap<String, Vec<Inbound>>,
}

impl RelayState {
    fn deliver(&mut self, to: &str, msg: Inbound) {
        if let Some(queue) = self.held.get_mut(to) {
            queue.push(msg);
            return;
        }
        let event = msg.event();
        let mut delivered = false;
        self.listeners.retain(|l| {
            if l.owner != to || l.event != event {
                return true;
            }
            delivered = true;
            // A closed sink means its owner is gone
            l.sink.send(msg.clone()).is_ok()
        });
        if !delivered {
            debug!("no {} listener for {}, dropped", event.as_str(), to);
        }
    }

    fn occupants(&self, room: &str, except: &str) -> Vec<String> {
        self.members
            .iter()
            .filter(|(id, m)| id.as_str() != except && m.room.as_deref() == Some(room))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn leave_room(&mut self, id: &str) {
        let Some(member) = self.members.get_mut(id) else {
            return;
        };
        let Some(room) = member.room.take() else {
            return;
        };
        let display_name = member.display_name.clone();
        info!("{} left room {}", id, room);
        for other in self.occupants(&room, id) {
            self.deliver(
                &other,
                Inbound::ParticipantLeft {
                    id: id.to_owned(),
                    display_name: display_name.clone(),
                },
            );
        }
    }

    fn join_room(&mut self, id: &str, room: &str, display_name: &str) {
        self.leave_room(id);
        if let Some(member) = self.members.get_mut(id) {
            member.room = Some(room.to_owned());
            member.display_name = display_name.to_owned();
        }
        info!("{} joined room {}", id, room);
        for other in self.occupants(room, id) {
            self.deliver(
                &other,
                Inbound::ParticipantJoined {
                    id: id.to_owned(),
                    display_name: display_name.to_owned(),
                },
            );
        }
    }

    fn same_room(&self, a: &str, b: &str) -> bool {
        match (self.members.get(a), self.members.get(b)) {
            (Some(a), Some(b)) => b.connected && a.room.is_some() && a.room == b.room,
            _ => false,
        }
    }
}

/// The relay; clone it to hand out more connections
#[derive(Clone, Default)]
pub struct LocalRelay {
    state: Arc<Mutex<RelayState>>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a client under a fresh id
    pub fn connect(&self) -> Arc<RelayClient> {
        self.connect_as(&prefixed_id("peer"))
    }

    /// Connects a client under a chosen id
    pub fn connect_as(&self, id: &str) -> Arc<RelayClient> {
        self.state.lock().members.insert(
            id.to_owned(),
            Member {
                room: None,
                display_name: String::new(),
                connected: true,
            },
        );
        debug!("relay client {} connected", id);
        Arc::new(RelayClient {
            id: id.to_owned(),
            state: Arc::clone(&self.state),
        })
    }

    /// Connected members of `room`
    pub fn room_members(&self, room: &str) -> Vec<String> {
        self.state.lock().occupants(room, "")
    }

    /// Drops a client's connection: it leaves its room and is told it is
    /// disconnected
    pub fn disconnect(&self, id: &str) {
        let mut state = self.state.lock();
        state.leave_room(id);
        if let Some(member) = state.members.get_mut(id) {
            member.connected = false;
        }
        state.deliver(id, Inbound::Disconnected);
        state.listeners.retain(|l| l.owner != id);
        info!("relay client {} disconnected", id);
    }

    /// Delivers a raw inbound message to `to`, bypassing room checks
    pub fn inject(&self, to: &str, msg: Inbound) {
        self.state.lock().deliver(to, msg);
    }

    /// Parks every delivery to `id` until [`resume`](Self::resume), as a
    /// slow link would
    pub fn pause(&self, id: &str) {
        self.state.lock().held.entry(id.to_owned()).or_default();
    }

    /// Delivers everything parked for `id`, in order
    pub fn resume(&self, id: &str) {
        let mut state = self.state.lock();
        let Some(queue) = state.held.remove(id) else {
            return;
        };
        debug!("releasing {} held messages for {}", queue.len(), id);
        for msg in queue {
            state.deliver(id, msg);
        }
    }

    pub fn listener_count(&self, owner: &str) -> usize {
        self.state
            .lock()
            .listeners
            .iter()
            .filter(|l| l.owner == owner)
            .count()
    }
}

/// One client's connection to a [`LocalRelay`]
pub struct RelayClient {
    id: String,
    state: Arc<Mutex<RelayState>>,
}

impl SignalingChannel for RelayClient {
    fn participant_id(&self) -> &str {
        &self.id
    }

    fn send(&self, message: Outbound) -> Result<()> {
        let mut state = self.state.lock();
        if !state.members.get(&self.id).map_or(false, |m| m.connected) {
            return Err(Error::ChannelDisconnected);
        }

        let from = self.id.clone();
        let (to, inbound) = match message {
            Outbound::JoinRoom {
                room_id,
                display_name,
            } => {
                state.join_room(&self.id, &room_id, &display_name);
                return Ok(());
            }
            Outbound::LeaveRoom { room_id } => {
                let in_room = state
                    .members
                    .get(&self.id)
                    .map_or(false, |m| m.room.as_deref() == Some(room_id.as_str()));
                if in_room {
                    state.leave_room(&self.id);
                }
                return Ok(());
            }
            Outbound::CallOffer { to, offer } => (to, Inbound::CallOffer { from, offer }),
            Outbound::CallAnswer { to, answer } => (to, Inbound::CallAnswer { from, answer }),
            Outbound::RenegoOffer { to, offer } => (to, Inbound::RenegoOffer { from, offer }),
            Outbound::RenegoAnswer { to, answer } => {
                (to, Inbound::RenegoAnswer { from, answer })
            }
            Outbound::ChatMessage { to, text } => (
                to,
                Inbound::ChatMessage {
                    payload: json!({ "from": from, "text": text }),
                    from,
                },
            ),
            Outbound::CallEnd { to } => (to, Inbound::CallEnd { from }),
        };

        if !state.same_room(&self.id, &to) {
            debug!(
                "{} from {} to {} dropped: not in the same room",
                inbound.event().as_str(),
                self.id,
                to
            );
            return Ok(());
        }
        state.deliver(&to, inbound);
        Ok(())
    }

    fn subscribe(
        &self,
        event: EventName,
        sink: mpsc::UnboundedSender<Inbound>,
    ) -> Result<ListenerId> {
        let mut state = self.state.lock();
        if !state.members.get(&self.id).map_or(false, |m| m.connected) {
            return Err(Error::ChannelDisconnected);
        }
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.listeners.push(Listener {
            id,
            owner: self.id.clone(),
            event,
            sink,
        });
        Ok(id)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.state.lock().listeners.retain(|l| l.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::SessionDescription;
    use crate::signaling::Subscription;

    fn listen(
        client: &Arc<RelayClient>,
    ) -> (Vec<Subscription>, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel: Arc<dyn SignalingChannel> = client.clone();
        let subs = EventName::ALL
            .into_iter()
            .map(|event| Subscription::register(&channel, event, tx.clone()).unwrap())
            .collect();
        (subs, rx)
    }

    fn join(client: &RelayClient, room: &str) {
        client
            .send(Outbound::JoinRoom {
                room_id: room.into(),
                display_name: client.participant_id().into(),
            })
            .unwrap();
    }

    #[test]
    fn test_join_is_broadcast_to_others_only() {
        let relay = LocalRelay::new();
        let a = relay.connect_as("a");
        let b = relay.connect_as("b");
        let (_sa, mut a_rx) = listen(&a);
        let (_sb, mut b_rx) = listen(&b);

        join(&a, "42");
        join(&b, "42");

        assert_eq!(
            a_rx.try_recv().unwrap(),
            Inbound::ParticipantJoined {
                id: "b".into(),
                display_name: "b".into()
            }
        );
        assert!(b_rx.try_recv().is_err());
        assert_eq!(relay.room_members("42"), vec!["a", "b"]);
    }

    #[test]
    fn test_directed_delivery_needs_same_room() {
        let relay = LocalRelay::new();
        let a = relay.connect_as("a");
        let b = relay.connect_as("b");
        let (_sb, mut b_rx) = listen(&b);

        join(&a, "1");
        join(&b, "2");
        a.send(Outbound::CallEnd { to: "b".into() }).unwrap();
        assert!(b_rx.try_recv().is_err());

        join(&b, "1");
        a.send(Outbound::CallOffer {
            to: "b".into(),
            offer: SessionDescription::offer("x"),
        })
        .unwrap();
        a.send(Outbound::ChatMessage {
            to: "b".into(),
            text: "hi".into(),
        })
        .unwrap();
        assert!(matches!(b_rx.try_recv().unwrap(), Inbound::CallOffer { from, .. } if from == "a"));
        match b_rx.try_recv().unwrap() {
            Inbound::ChatMessage { from, payload } => {
                assert_eq!(from, "a");
                assert_eq!(payload["text"], "hi");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_paused_delivery_keeps_order() {
        let relay = LocalRelay::new();
        let a = relay.connect_as("a");
        let b = relay.connect_as("b");
        let (_sb, mut b_rx) = listen(&b);
        join(&a, "1");
        join(&b, "1");

        relay.pause("b");
        for text in ["one", "two"] {
            a.send(Outbound::ChatMessage {
                to: "b".into(),
                text: text.into(),
            })
            .unwrap();
        }
        assert!(b_rx.try_recv().is_err());

        relay.resume("b");
        for text in ["one", "two"] {
            match b_rx.try_recv().unwrap() {
                Inbound::ChatMessage { payload, .. } => assert_eq!(payload["text"], text),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_dropping_subscriptions_unregisters() {
        let relay = LocalRelay::new();
        let a = relay.connect_as("a");
        let (subs, _rx) = listen(&a);
        assert_eq!(relay.listener_count("a"), EventName::ALL.len());
        drop(subs);
        assert_eq!(relay.listener_count("a"), 0);
    }

    #[test]
    fn test_disconnect_notifies_and_refuses_sends() {
        let relay = LocalRelay::new();
        let a = relay.connect_as("a");
        let b = relay.connect_as("b");
        let (_sa, mut a_rx) = listen(&a);
        let (_sb, mut b_rx) = listen(&b);
        join(&a, "42");
        join(&b, "42");
        while a_rx.try_recv().is_ok() {}

        relay.disconnect("b");
        assert_eq!(b_rx.try_recv().unwrap(), Inbound::Disconnected);
        assert!(matches!(
            a_rx.try_recv().unwrap(),
            Inbound::ParticipantLeft { id, .. } if id == "b"
        ));
        assert!(matches!(
            b.send(Outbound::LeaveRoom { room_id: "42".into() }),
            Err(Error::ChannelDisconnected)
        ));
    }
}
