//! In-process transport
//!
//! Descriptions produced here carry the list of tracks the side is sending,
//! so applying the peer's description is enough to learn which remote tracks
//! appeared or went away. The offer/answer state rules follow the WebRTC
//! signaling state machine (stable, have-local-offer, have-remote-offer).

use super::transport::{Transport, TransportFactory, TransportLink};
use super::types::{
    ConnectionState, RemoteTrack, SdpType, SenderId, SessionDescription, TransportEvent,
};
use crate::error::{Error, Result};
use crate::media::LocalTrack;
use crate::utils::random_id;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// Operation that should fail once, for exercising error paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateOffer,
    CreateAnswer,
    SetRemoteDescription,
    AddTrack,
}

#[derive(Serialize, Deserialize)]
struct MemorySdp {
    session: String,
    version: u64,
    tracks: Vec<RemoteTrack>,
}

struct MemoryState {
    signaling: SignalingState,
    senders: BTreeMap<u64, RemoteTrack>,
    next_sender: u64,
    version: u64,
    local: Option<SessionDescription>,
    remote_tracks: BTreeMap<String, RemoteTrack>,
    connected: bool,
    closed: bool,
    fail_next: Option<FailPoint>,
}

pub struct MemoryTransport {
    session: String,
    state: Mutex<MemoryState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            session: random_id(),
            state: Mutex::new(MemoryState {
                signaling: SignalingState::Stable,
                senders: BTreeMap::new(),
                next_sender: 1,
                version: 0,
                local: None,
                remote_tracks: BTreeMap::new(),
                connected: false,
                closed: false,
                fail_next: None,
            }),
            events: tx,
        });
        (transport, rx)
    }

    pub fn fail_next(&self, point: FailPoint) {
        self.state.lock().fail_next = Some(point);
    }

    /// Number of tracks currently being sent
    pub fn sender_count(&self) -> usize {
        self.state.lock().senders.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn check(state: &mut MemoryState, point: FailPoint) -> Result<()> {
        if state.closed {
            return Err(Error::Transport("transport is closed".into()));
        }
        if state.fail_next == Some(point) {
            state.fail_next = None;
            return Err(Error::Negotiation(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn describe(&self, state: &mut MemoryState) -> Result<String> {
        state.version += 1;
        let sdp = MemorySdp {
            session: self.session.clone(),
            version: state.version,
            tracks: state.senders.values().cloned().collect(),
        };
        Ok(serde_json::to_string(&sdp)?)
    }

    /// Diffs the peer's advertised tracks against what we knew
    fn apply_remote_tracks(&self, state: &mut MemoryState, sdp: &str) -> Result<()> {
        let parsed: MemorySdp = serde_json::from_str(sdp)
            .map_err(|e| Error::Negotiation(format!("unreadable description: {}", e)))?;

        let mut incoming: BTreeMap<String, RemoteTrack> = parsed
            .tracks
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        let ended: Vec<String> = state
            .remote_tracks
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect();
        for id in ended {
            state.remote_tracks.remove(&id);
            self.emit(TransportEvent::TrackEnded(id));
        }

        let known: Vec<String> = state.remote_tracks.keys().cloned().collect();
        for id in known {
            incoming.remove(&id);
        }
        for (id, track) in incoming {
            state.remote_tracks.insert(id, track.clone());
            self.emit(TransportEvent::TrackAdded(track));
        }
        Ok(())
    }

    fn mark_stable(&self, state: &mut MemoryState) {
        state.signaling = SignalingState::Stable;
        if !state.connected {
            state.connected = true;
            self.emit(TransportEvent::StateChanged(ConnectionState::Connected));
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        Self::check(&mut state, FailPoint::CreateOffer)?;
        if state.signaling == SignalingState::HaveRemoteOffer {
            return Err(Error::Negotiation(
                "cannot create an offer while a remote offer is pending".into(),
            ));
        }
        let sdp = self.describe(&mut state)?;
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        Self::check(&mut state, FailPoint::CreateAnswer)?;
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(Error::Negotiation("no remote offer to answer".into()));
        }
        let sdp = self.describe(&mut state)?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Transport("transport is closed".into()));
        }
        match (desc.sdp_type, state.signaling) {
            (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                state.signaling = SignalingState::HaveLocalOffer;
            }
            (SdpType::Answer, SignalingState::HaveRemoteOffer) => {
                self.mark_stable(&mut state);
            }
            (kind, current) => {
                return Err(Error::Negotiation(format!(
                    "cannot apply local {:?} in {:?}",
                    kind, current
                )));
            }
        }
        state.local = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        Self::check(&mut state, FailPoint::SetRemoteDescription)?;
        match (desc.sdp_type, state.signaling) {
            (SdpType::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                self.apply_remote_tracks(&mut state, &desc.sdp)?;
                state.signaling = SignalingState::HaveRemoteOffer;
            }
            (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                self.apply_remote_tracks(&mut state, &desc.sdp)?;
                self.mark_stable(&mut state);
            }
            (kind, current) => {
                return Err(Error::Negotiation(format!(
                    "cannot apply remote {:?} in {:?}",
                    kind, current
                )));
            }
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.signaling != SignalingState::Stable {
            debug!("memory transport {} rolled back", self.session);
            state.signaling = SignalingState::Stable;
        }
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack, stream_id: &str) -> Result<SenderId> {
        let id = {
            let mut state = self.state.lock();
            Self::check(&mut state, FailPoint::AddTrack)?;
            let id = state.next_sender;
            state.next_sender += 1;
            state.senders.insert(
                id,
                RemoteTrack {
                    id: track.id().to_string(),
                    kind: track.kind(),
                    stream_id: stream_id.to_string(),
                },
            );
            id
        };
        self.emit(TransportEvent::NegotiationNeeded);
        Ok(SenderId(id))
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        let removed = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Transport("transport is closed".into()));
            }
            state.senders.remove(&sender.0).is_some()
        };
        if !removed {
            return Err(Error::Transport(format!("unknown sender {:?}", sender)));
        }
        self.emit(TransportEvent::NegotiationNeeded);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            state.senders.clear();
            state.remote_tracks.clear();
            self.emit(TransportEvent::StateChanged(ConnectionState::Closed));
        }
        Ok(())
    }
}

/// Opens [`MemoryTransport`]s and remembers them for inspection
#[derive(Default)]
pub struct MemoryTransportFactory {
    opened: Mutex<Vec<Arc<MemoryTransport>>>,
}

impl MemoryTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Most recently opened transport
    pub fn last(&self) -> Option<Arc<MemoryTransport>> {
        self.opened.lock().last().cloned()
    }

    pub fn opened_count(&self) -> usize {
        self.opened.lock().len()
    }
}

#[async_trait]
impl TransportFactory for MemoryTransportFactory {
    async fn open(&self) -> Result<TransportLink> {
        let (transport, events) = MemoryTransport::new();
        self.opened.lock().push(Arc::clone(&transport));
        Ok(TransportLink {
            transport,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackKind;

    async fn handshake(a: &MemoryTransport, b: &MemoryTransport) {
        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_tracks_flow_through_descriptions() {
        let (a, mut a_rx) = MemoryTransport::new();
        let (b, mut b_rx) = MemoryTransport::new();

        let mic = LocalTrack::new(TrackKind::Audio, "mic");
        a.add_track(&mic, "s1").await.unwrap();
        assert_eq!(drain(&mut a_rx), vec![TransportEvent::NegotiationNeeded]);

        handshake(&a, &b).await;
        let events = drain(&mut b_rx);
        assert!(events.iter().any(|e| matches!(
            e,
            TransportEvent::TrackAdded(t) if t.id == mic.id() && t.stream_id == "s1"
        )));
        assert!(events.contains(&TransportEvent::StateChanged(ConnectionState::Connected)));
        drain(&mut a_rx);

        let sender = SenderId(1);
        a.remove_track(sender).await.unwrap();
        handshake(&a, &b).await;
        assert!(drain(&mut b_rx).contains(&TransportEvent::TrackEnded(mic.id().to_string())));
    }

    #[tokio::test]
    async fn test_remote_offer_needs_rollback_in_glare() {
        let (a, _a_rx) = MemoryTransport::new();
        let (b, _b_rx) = MemoryTransport::new();
        handshake(&a, &b).await;

        let a_offer = a.create_offer().await.unwrap();
        a.set_local_description(a_offer).await.unwrap();
        let b_offer = b.create_offer().await.unwrap();
        b.set_local_description(b_offer.clone()).await.unwrap();

        assert!(a.set_remote_description(b_offer.clone()).await.is_err());
        a.rollback().await.unwrap();
        a.set_remote_description(b_offer).await.unwrap();
        let answer = a.create_answer().await.unwrap();
        a.set_local_description(answer.clone()).await.unwrap();
        b.set_remote_description(answer).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let (a, _rx) = MemoryTransport::new();
        a.fail_next(FailPoint::CreateOffer);
        assert!(matches!(a.create_offer().await, Err(Error::Negotiation(_))));
        assert!(a.create_offer().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_transport_refuses_work() {
        let (a, mut rx) = MemoryTransport::new();
        a.close().await.unwrap();
        assert!(a.is_closed());
        assert!(a.create_offer().await.is_err());
        assert_eq!(
            drain(&mut rx),
            vec![TransportEvent::StateChanged(ConnectionState::Closed)]
        );
    }
}
