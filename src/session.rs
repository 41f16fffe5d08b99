//! Call lifecycle
//!
//! A [`CallSession`] is one participant's view of a two-party call in a
//! room. All of its state is mutated from one logical thread: either by
//! awaiting its methods directly (and draining inbound events with
//! [`CallSession::process_pending`]), or by handing it to
//! [`CallSession::run`] and driving it with [`Command`]s.

use crate::chat::{ChatLog, ChatMessage};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{EventSink, SessionEvent};
use crate::media::{MediaDevices, TrackManager};
use crate::membership::{Presence, RoomMembership};
use crate::peer::{
    ConnectionState, NegotiationState, Negotiator, OfferRound, RemoteStream, SessionDescription,
    TransportEvent, TransportFactory, WebRtcTransportFactory,
};
use crate::signaling::{EventName, Inbound, Outbound, SignalingChannel, Subscription};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Calling,
    Connected,
    Ended,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    RemoteLeft,
    ChannelDisconnected,
    Disposed,
}

impl EndReason {
    /// Ends caused by the other side, after which the session may rearm
    pub fn is_remote(&self) -> bool {
        matches!(self, EndReason::RemoteHangup | EndReason::RemoteLeft)
    }
}

/// User actions for [`CallSession::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Call,
    EndCall,
    ToggleScreenShare,
    ToggleAudio,
    ToggleVideo,
    ShareLocalMedia,
    SendChat(String),
    Reset,
    Shutdown,
}

pub struct CallSession {
    config: SessionConfig,
    room_id: String,
    local_id: String,
    channel: Arc<dyn SignalingChannel>,
    subscriptions: Vec<Subscription>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    membership: RoomMembership,
    negotiator: Negotiator,
    media: TrackManager,
    chat: ChatLog,
    events: EventSink,
    state: CallState,
    end_reason: Option<EndReason>,
    in_room: bool,
    connection_problem: bool,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl CallSession {
    pub fn new(
        config: SessionConfig,
        room_id: impl Into<String>,
        channel: Arc<dyn SignalingChannel>,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn TransportFactory>,
        events: EventSink,
    ) -> Result<Self> {
        config.validate()?;
        let local_id = channel.participant_id().to_owned();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        Ok(Self {
            negotiator: Negotiator::new(local_id.clone(), factory, config.negotiation_timeout()),
            media: TrackManager::new(devices),
            config,
            room_id: room_id.into(),
            local_id,
            channel,
            subscriptions: Vec::new(),
            inbox_tx,
            inbox,
            membership: RoomMembership::new(),
            chat: ChatLog::new(),
            events,
            state: CallState::Idle,
            end_reason: None,
            in_room: false,
            connection_problem: false,
        })
    }

    /// A session whose calls run over WebRTC with the ICE servers of `config`
    pub fn with_webrtc(
        config: SessionConfig,
        room_id: impl Into<String>,
        channel: Arc<dyn SignalingChannel>,
        devices: Arc<dyn MediaDevices>,
        events: EventSink,
    ) -> Result<Self> {
        let factory = WebRtcTransportFactory::from_config(&config);
        Self::new(config, room_id, channel, devices, factory, events)
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn remote_participant(&self) -> Option<&str> {
        self.membership.remote()
    }

    pub fn occupancy(&self) -> usize {
        self.membership.occupancy()
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.negotiator.state()
    }

    pub fn remote_stream(&self) -> &RemoteStream {
        self.negotiator.remote_stream()
    }

    pub fn media(&self) -> &TrackManager {
        &self.media
    }

    pub fn chat_messages(&self) -> &[ChatMessage] {
        self.chat.messages()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn set_state(&mut self, state: CallState) {
        if self.state != state {
            info!("call state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.events.emit(SessionEvent::StateChanged(state));
        }
    }

    fn report(&self, err: &Error) {
        warn!("{}", err);
        self.events.emit(SessionEvent::Error(err.to_string()));
    }

    /// Reports `err`, ending the call when the session cannot go on
    async fn fail(&mut self, err: Error) {
        self.report(&err);
        if err.ends_session() {
            self.teardown(EndReason::ChannelDisconnected).await;
        }
    }

    fn announce(&self, presence: Option<Presence>) {
        match presence {
            Some(Presence::RemotePresent { id, display_name }) => {
                info!("remote participant {} ({})", id, display_name);
                self.events
                    .emit(SessionEvent::RemotePresent { id, display_name });
            }
            Some(Presence::RemoteAbsent { id }) => {
                info!("remote participant {} is gone", id);
                self.events.emit(SessionEvent::RemoteAbsent { id });
            }
            None => {}
        }
    }

    fn subscribe_all(&mut self) -> Result<()> {
        if !self.subscriptions.is_empty() {
            return Ok(());
        }
        for event in EventName::ALL {
            let sub = Subscription::register(&self.channel, event, self.inbox_tx.clone())?;
            self.subscriptions.push(sub);
        }
        debug!("subscribed to {} signaling events", self.subscriptions.len());
        Ok(())
    }

    fn enter_room(&mut self) -> Result<()> {
        self.channel.send(Outbound::JoinRoom {
            room_id: self.room_id.clone(),
            display_name: self.config.display_name.clone(),
        })?;
        self.in_room = true;
        info!("joined room {} as {}", self.room_id, self.local_id);
        Ok(())
    }

    /// Starts listening and enters the room
    pub async fn join(&mut self) -> Result<()> {
        if self.state == CallState::Ended {
            return Err(Error::InvalidState("session ended, reset it first".into()));
        }
        self.subscribe_all()?;
        if !self.in_room {
            self.enter_room()?;
        }
        Ok(())
    }

    /// Calls the bound remote participant
    pub async fn initiate_call(&mut self) -> Result<()> {
        if self.state != CallState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot call while {:?}",
                self.state
            )));
        }
        let Some(remote) = self.membership.remote().map(str::to_owned) else {
            return Err(Error::NoRemoteParticipant);
        };

        match self
            .negotiator
            .initiate_call(&remote, &mut self.media, &*self.channel)
            .await
        {
            Ok(()) => {
                self.set_state(CallState::Calling);
                Ok(())
            }
            Err(e) => {
                self.media.release_all();
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Hangs up: tells the peer, leaves the room and releases everything
    pub async fn end_call(&mut self) -> Result<()> {
        self.teardown(EndReason::LocalHangup).await;
        Ok(())
    }

    /// Returns whether the screen is now being shared
    pub async fn toggle_screen_share(&mut self) -> Result<bool> {
        let transport = self.negotiator.transport().cloned();
        match self.media.toggle_screen_share(transport.as_deref()).await {
            Ok(sharing) => {
                self.events.emit(SessionEvent::ScreenShareChanged(sharing));
                Ok(sharing)
            }
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Returns whether audio is now muted
    pub fn toggle_audio_mute(&mut self) -> bool {
        self.media.toggle_audio_mute()
    }

    /// Returns whether video is now stopped
    pub fn toggle_video_stop(&mut self) -> bool {
        self.media.toggle_video_stop()
    }

    /// Sends the camera/mic to the peer, returning how many tracks were added
    pub async fn share_local_media(&mut self) -> Result<usize> {
        let Some(transport) = self.negotiator.transport().cloned() else {
            return Err(Error::InvalidState("no call to share media on".into()));
        };
        let result = async {
            let stream = self.media.acquire_camera_and_mic().await?;
            self.media.attach_local_tracks(&stream, &*transport).await
        }
        .await;
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    pub fn send_chat(&mut self, text: &str) -> Result<()> {
        let sent = self
            .chat
            .send(text, self.membership.remote(), &*self.channel)?;
        if let Some(message) = sent {
            self.events.emit(SessionEvent::Chat(message));
        }
        Ok(())
    }

    /// Makes an ended session ready for another call in the same room
    pub async fn reset(&mut self) -> Result<()> {
        if self.state != CallState::Ended {
            return Err(Error::InvalidState(format!(
                "reset needs an ended call, not {:?}",
                self.state
            )));
        }
        self.subscribe_all()?;
        self.end_reason = None;
        self.connection_problem = false;
        if self.in_room {
            let presence = self.membership.rebind();
            self.announce(presence);
        } else {
            self.membership.reset();
            self.enter_room()?;
        }
        self.set_state(CallState::Idle);
        Ok(())
    }

    /// Releases everything without telling the peer
    pub async fn dispose(&mut self) {
        self.teardown(EndReason::Disposed).await;
    }

    fn call_in_progress(&self) -> bool {
        matches!(self.state, CallState::Calling | CallState::Connected)
            || self.negotiator.transport().is_some()
            || self.media.has_media()
    }

    fn is_bound_remote(&self, id: &str) -> bool {
        self.membership.remote() == Some(id)
    }

    fn sync_connected(&mut self) {
        if !self.negotiator.is_established()
            || !matches!(self.state, CallState::Idle | CallState::Calling)
        {
            return;
        }
        self.set_state(CallState::Connected);
        let remote = self.membership.remote().unwrap_or_default().to_owned();
        self.events.emit(SessionEvent::Connected { remote });
    }

    /// Handles one signaling message. Problems are reported as events,
    /// never returned.
    pub async fn handle_inbound(&mut self, msg: Inbound) {
        if self.state == CallState::Ended {
            debug!("session ended, ignoring {}", msg.event().as_str());
            return;
        }

        match msg {
            Inbound::ParticipantJoined { id, display_name } => {
                if id == self.local_id {
                    return;
                }
                let presence = self.membership.on_joined(&id, &display_name);
                self.announce(presence);
            }
            Inbound::ParticipantLeft { id, .. } => {
                let was_remote = self.is_bound_remote(&id);
                let presence = self.membership.on_left(&id);
                self.announce(presence);
                if was_remote && self.call_in_progress() {
                    self.teardown(EndReason::RemoteLeft).await;
                }
            }
            Inbound::CallOffer { from, offer } => {
                if let Some(bound) = self.membership.remote() {
                    if bound != from {
                        warn!("call from {} while talking to {}, ignored", from, bound);
                        return;
                    }
                }
                let presence = self.membership.bind_caller(&from);
                self.announce(presence);
                self.answer_offer(&from, OfferRound::Call, offer).await;
            }
            Inbound::RenegoOffer { from, offer } => {
                if !self.is_bound_remote(&from) {
                    warn!("renegotiation offer from stranger {}, ignored", from);
                    return;
                }
                self.answer_offer(&from, OfferRound::Renegotiation, offer).await;
            }
            Inbound::CallAnswer { from, answer } | Inbound::RenegoAnswer { from, answer } => {
                if !self.is_bound_remote(&from) {
                    warn!("answer from stranger {}, ignored", from);
                    return;
                }
                self.apply_answer(&from, answer).await;
            }
            Inbound::ChatMessage { from, payload } => {
                debug!("chat from {}", from);
                if let Some(message) = self.chat.on_incoming(&payload) {
                    self.events.emit(SessionEvent::Chat(message));
                }
            }
            Inbound::CallEnd { from } => {
                if !self.is_bound_remote(&from) {
                    debug!("call-end from {} who is not our peer, ignored", from);
                    return;
                }
                if self.call_in_progress() {
                    self.teardown(EndReason::RemoteHangup).await;
                } else {
                    self.membership.unbind();
                    self.events.emit(SessionEvent::RemoteAbsent { id: from });
                }
            }
            Inbound::Disconnected => self.fail(Error::ChannelDisconnected).await,
        }
    }

    async fn answer_offer(&mut self, from: &str, round: OfferRound, offer: SessionDescription) {
        let result = self
            .negotiator
            .handle_incoming_offer(
                from,
                round,
                offer,
                &mut self.media,
                &*self.channel,
                self.config.share_on_answer,
            )
            .await;
        match result {
            Ok(_) => self.sync_connected(),
            Err(e) => {
                self.report(&e);
                if !self.negotiator.is_established() {
                    self.media.release_all();
                }
                // A failed replay after a good answer still leaves us connected
                self.sync_connected();
            }
        }
    }

    async fn apply_answer(&mut self, from: &str, answer: SessionDescription) {
        let result = self
            .negotiator
            .handle_incoming_answer(from, answer, &mut self.media, &*self.channel)
            .await;
        if let Err(e) = result {
            self.report(&e);
            if self.state == CallState::Calling && !self.negotiator.is_established() {
                self.media.release_all();
                self.set_state(CallState::Idle);
                return;
            }
        }
        self.sync_connected();
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::NegotiationNeeded => {
                let remote = self.membership.remote().map(str::to_owned);
                if let Err(e) = self
                    .negotiator
                    .on_negotiation_needed(remote.as_deref(), &*self.channel)
                    .await
                {
                    self.fail(e).await;
                }
            }
            TransportEvent::TrackAdded(track) => {
                if self.negotiator.remote_track_added(track.clone()) {
                    self.events.emit(SessionEvent::RemoteTrackAdded(track));
                }
            }
            TransportEvent::TrackEnded(id) => {
                if let Some(track) = self.negotiator.remote_track_ended(&id) {
                    self.events.emit(SessionEvent::RemoteTrackRemoved(track));
                }
            }
            TransportEvent::StateChanged(state) => match state {
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    self.connection_problem = true;
                    self.events.emit(SessionEvent::ConnectionProblem(state));
                }
                ConnectionState::Connected if self.connection_problem => {
                    self.connection_problem = false;
                    self.events.emit(SessionEvent::ConnectionRecovered);
                }
                _ => debug!("transport state {:?}", state),
            },
        }
    }

    /// Screen capture was ended from outside (e.g. the platform's own
    /// "stop sharing" control)
    async fn handle_capture_ended(&mut self) {
        let transport = self.negotiator.transport().cloned();
        if self.media.stop_screen_share(transport.as_deref()).await {
            self.events.emit(SessionEvent::ScreenShareChanged(false));
        }
    }

    async fn check_negotiation_timeout(&mut self) {
        if let Err(e) = self.negotiator.check_timeout().await {
            self.report(&e);
            if self.state == CallState::Calling
                && self.negotiator.state() == NegotiationState::Idle
            {
                // A late answer would otherwise leave the callee in a call we dropped
                if let Some(to) = self.membership.remote() {
                    let to = to.to_owned();
                    if let Err(e) = self.channel.send(Outbound::CallEnd { to }) {
                        self.fail(e).await;
                        return;
                    }
                }
                self.media.release_all();
                self.set_state(CallState::Idle);
            }
        }
    }

    /// Handles everything already queued: signaling messages, transport
    /// events, capture-ended notices and an expired offer. Returns the number
    /// of items handled.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(msg) = self.inbox.try_recv() {
                self.handle_inbound(msg).await;
            } else if let Some(event) = self.negotiator.try_next_event() {
                self.handle_transport_event(event).await;
            } else if self.media.capture_has_ended() {
                self.handle_capture_ended().await;
            } else {
                break;
            }
            handled += 1;
        }
        if self
            .negotiator
            .timeout_deadline()
            .map_or(false, |deadline| deadline <= Instant::now())
        {
            self.check_negotiation_timeout().await;
            handled += 1;
        }
        handled
    }

    pub async fn execute(&mut self, command: Command) -> Result<()> {
        debug!("command {:?}", command);
        match command {
            Command::Call => self.initiate_call().await,
            Command::EndCall => self.end_call().await,
            Command::ToggleScreenShare => self.toggle_screen_share().await.map(|_| ()),
            Command::ToggleAudio => {
                self.toggle_audio_mute();
                Ok(())
            }
            Command::ToggleVideo => {
                self.toggle_video_stop();
                Ok(())
            }
            Command::ShareLocalMedia => self.share_local_media().await.map(|_| ()),
            Command::SendChat(text) => self.send_chat(&text),
            Command::Reset => self.reset().await,
            Command::Shutdown => Ok(()),
        }
    }

    /// Drives the session until `Shutdown` or until `commands` closes, then
    /// disposes it
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> Result<()> {
        self.join().await?;
        loop {
            let deadline = self.negotiator.timeout_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => {
                        if let Err(e) = self.execute(command).await {
                            debug!("command failed: {}", e);
                        }
                    }
                },
                Some(msg) = self.inbox.recv() => self.handle_inbound(msg).await,
                event = self.negotiator.next_event() => self.handle_transport_event(event).await,
                _ = self.media.capture_ended() => self.handle_capture_ended().await,
                _ = wait_until(deadline) => self.check_negotiation_timeout().await,
            }

            let rearm = self.state == CallState::Ended
                && self.config.rearm_after_remote_end
                && self.end_reason.map_or(false, |r| r.is_remote());
            if rearm {
                if let Err(e) = self.reset().await {
                    self.report(&e);
                }
            }
        }
        self.dispose().await;
        Ok(())
    }

    /// Single exit path for every way a call ends
    async fn teardown(&mut self, reason: EndReason) {
        if self.state == CallState::Ended {
            return;
        }
        info!("ending call: {:?}", reason);

        self.subscriptions.clear();
        // Room changes already queued still count
        while let Ok(msg) = self.inbox.try_recv() {
            match msg {
                Inbound::ParticipantJoined { id, display_name } if id != self.local_id => {
                    self.membership.on_joined(&id, &display_name);
                }
                Inbound::ParticipantLeft { id, .. } => {
                    self.membership.on_left(&id);
                }
                other => debug!("dropping {} at teardown", other.event().as_str()),
            }
        }

        let remote = self.membership.unbind();
        if reason == EndReason::LocalHangup {
            if let Some(to) = &remote {
                if let Err(e) = self.channel.send(Outbound::CallEnd { to: to.clone() }) {
                    debug!("call-end not delivered: {}", e);
                }
            }
            if self.in_room {
                if let Err(e) = self.channel.send(Outbound::LeaveRoom {
                    room_id: self.room_id.clone(),
                }) {
                    debug!("leave-room not delivered: {}", e);
                }
                self.in_room = false;
                self.membership.reset();
            }
        }

        let was_sharing = self.media.is_screen_sharing();
        self.negotiator.teardown().await;
        let released = self.media.release_all();
        debug!("released {} local tracks", released);
        self.chat.clear();
        self.connection_problem = false;

        if was_sharing {
            self.events.emit(SessionEvent::ScreenShareChanged(false));
        }
        self.end_reason = Some(reason);
        self.set_state(CallState::Ended);
        self.events.emit(SessionEvent::Ended(reason));
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if let Some(transport) = self.negotiator.detach_transport() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = transport.close().await;
                });
            }
        }
        let released = self.media.release_all();
        if released > 0 {
            debug!("released {} tracks on drop", released);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SyntheticDevices;
    use crate::peer::MemoryTransportFactory;
    use crate::signaling::relay::LocalRelay;
    use serde_json::json;

    fn session(relay: &LocalRelay, id: &str) -> (CallSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = EventSink::new();
        let session = CallSession::new(
            SessionConfig::default(),
            "room",
            relay.connect_as(id),
            SyntheticDevices::new(),
            MemoryTransportFactory::new(),
            events,
        )
        .unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn test_webrtc_session_validates_config() {
        let relay = LocalRelay::new();
        let config = SessionConfig {
            ice_servers: vec![crate::config::ServerConfig {
                id: "t".into(),
                r#type: "turn".into(),
                url: "turn.example.org:3478".into(),
                username: None,
                credential: None,
            }],
            ..SessionConfig::default()
        };
        let result = CallSession::with_webrtc(
            config,
            "room",
            relay.connect_as("a"),
            SyntheticDevices::new(),
            EventSink::disabled(),
        );
        assert!(result.is_err());

        let session = CallSession::with_webrtc(
            SessionConfig::default(),
            "room",
            relay.connect_as("b"),
            SyntheticDevices::new(),
            EventSink::disabled(),
        )
        .unwrap();
        assert_eq!(session.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_call_without_remote_is_refused() {
        let relay = LocalRelay::new();
        let (mut a, _rx) = session(&relay, "a");
        a.join().await.unwrap();
        assert!(matches!(
            a.initiate_call().await,
            Err(Error::NoRemoteParticipant)
        ));
        assert_eq!(a.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_join_binds_later_arrival() {
        let relay = LocalRelay::new();
        let (mut a, mut rx) = session(&relay, "a");
        let (mut b, _b_rx) = session(&relay, "b");
        a.join().await.unwrap();
        b.join().await.unwrap();
        a.process_pending().await;

        assert_eq!(a.occupancy(), 1);
        assert_eq!(a.remote_participant(), Some("b"));
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::RemotePresent { id, .. } if id == "b"
        ));
        assert_eq!(b.remote_participant(), None);
    }

    #[tokio::test]
    async fn test_call_end_from_stranger_is_ignored() {
        let relay = LocalRelay::new();
        let (mut a, _rx) = session(&relay, "a");
        let (mut b, _b_rx) = session(&relay, "b");
        a.join().await.unwrap();
        b.join().await.unwrap();
        a.process_pending().await;
        a.initiate_call().await.unwrap();

        relay.inject("a", Inbound::CallEnd { from: "mallory".into() });
        a.process_pending().await;
        assert_eq!(a.state(), CallState::Calling);
    }

    #[tokio::test]
    async fn test_inbound_chat_validation() {
        let relay = LocalRelay::new();
        let (mut a, _rx) = session(&relay, "a");
        a.join().await.unwrap();
        for payload in [json!({}), json!({"text": 42}), json!(null), json!({"text": "hi"})] {
            relay.inject(
                "a",
                Inbound::ChatMessage {
                    from: "b".into(),
                    payload,
                },
            );
        }
        a.process_pending().await;
        assert_eq!(a.chat_messages().len(), 1);
        assert_eq!(a.chat_messages()[0].text, "hi");
    }

    #[tokio::test]
    async fn test_end_and_reset_rejoins_room() {
        let relay = LocalRelay::new();
        let (mut a, _rx) = session(&relay, "a");
        a.join().await.unwrap();
        assert_eq!(relay.listener_count("a"), EventName::ALL.len());

        a.end_call().await.unwrap();
        assert_eq!(a.state(), CallState::Ended);
        assert_eq!(a.end_reason(), Some(EndReason::LocalHangup));
        assert_eq!(a.subscription_count(), 0);
        assert_eq!(relay.listener_count("a"), 0);
        assert!(relay.room_members("room").is_empty());
        assert!(a.join().await.is_err());

        a.reset().await.unwrap();
        assert_eq!(a.state(), CallState::Idle);
        assert_eq!(relay.listener_count("a"), EventName::ALL.len());
        assert_eq!(relay.room_members("room"), vec!["a"]);
        assert!(a.reset().await.is_err());
    }

    #[tokio::test]
    async fn test_toggles_before_call() {
        let relay = LocalRelay::new();
        let (mut a, _rx) = session(&relay, "a");
        assert!(!a.toggle_audio_mute());
        assert!(!a.toggle_video_stop());
        assert!(matches!(
            a.toggle_screen_share().await,
            Err(Error::InvalidState(_))
        ));
        assert!(a.share_local_media().await.is_err());
        assert!(matches!(a.send_chat("hi"), Err(Error::NoRemoteParticipant)));
    }
}
