//! Offer/answer coordination for one call
//!
//! The coordinator owns the transport of the current call and the remote
//! stream. Only one offer is in flight at a time; renegotiation requested
//! while an exchange is running is remembered and replayed once stable.
//!
//! Simultaneous offers (glare) are settled by participant id: the side with
//! the larger id is polite and yields, the other ignores the colliding offer.

use super::transport::{Transport, TransportFactory};
use super::types::{RemoteStream, RemoteTrack, SessionDescription, TransportEvent};
use crate::error::{Error, Result};
use crate::media::TrackManager;
use crate::signaling::{Outbound, SignalingChannel};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferPending,
    AnswerPending,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfferKind {
    Initial,
    Renegotiation,
}

/// Whether an inbound offer belongs to the first handshake or a later one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferRound {
    Call,
    Renegotiation,
}

pub struct Negotiator {
    local_id: String,
    factory: Arc<dyn TransportFactory>,
    transport: Option<Arc<dyn Transport>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    state: NegotiationState,
    offer_kind: Option<OfferKind>,
    offer_sent_at: Option<Instant>,
    renegotiation_pending: bool,
    established: bool,
    remote_stream: RemoteStream,
    timeout: Option<Duration>,
}

impl Negotiator {
    pub fn new(
        local_id: impl Into<String>,
        factory: Arc<dyn TransportFactory>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            factory,
            transport: None,
            events: None,
            state: NegotiationState::Idle,
            offer_kind: None,
            offer_sent_at: None,
            renegotiation_pending: false,
            established: false,
            remote_stream: RemoteStream::default(),
            timeout,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// True once the first offer/answer exchange of this call completed
    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }

    pub fn remote_stream(&self) -> &RemoteStream {
        &self.remote_stream
    }

    pub fn is_renegotiation_pending(&self) -> bool {
        self.renegotiation_pending
    }

    /// The side with the larger id yields in glare
    pub fn is_polite(&self, remote_id: &str) -> bool {
        self.local_id.as_str() > remote_id
    }

    async fn ensure_transport(&mut self) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }
        let link = self.factory.open().await?;
        self.transport = Some(Arc::clone(&link.transport));
        self.events = Some(link.events);
        Ok(link.transport)
    }

    /// Previous resting state when an exchange is abandoned
    fn resting_state(&self) -> NegotiationState {
        if self.established {
            NegotiationState::Stable
        } else {
            NegotiationState::Idle
        }
    }

    /// Creates and applies a local offer, returning what should be sent
    async fn make_offer(transport: &dyn Transport) -> Result<SessionDescription> {
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        Ok(transport.local_description().await.unwrap_or(offer))
    }

    async fn make_answer(
        transport: &dyn Transport,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        transport.set_remote_description(offer).await?;
        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        Ok(transport.local_description().await.unwrap_or(answer))
    }

    /// Starts a call to `remote_id`: captures camera/mic and sends the offer
    #[instrument(skip(self, media, channel))]
    pub async fn initiate_call(
        &mut self,
        remote_id: &str,
        media: &mut TrackManager,
        channel: &dyn SignalingChannel,
    ) -> Result<()> {
        if self.state != NegotiationState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot start a call while {:?}",
                self.state
            )));
        }

        media.acquire_camera_and_mic().await?;

        let sent = async {
            let transport = self.ensure_transport().await?;
            let offer = Self::make_offer(&*transport).await?;
            channel.send(Outbound::CallOffer {
                to: remote_id.to_owned(),
                offer,
            })
        }
        .await;

        if let Err(e) = sent {
            warn!("call offer to {} failed: {}", remote_id, e);
            self.teardown().await;
            return Err(e);
        }

        self.state = NegotiationState::OfferPending;
        self.offer_kind = Some(OfferKind::Initial);
        self.offer_sent_at = Some(Instant::now());
        info!("call offer sent to {}", remote_id);
        Ok(())
    }

    /// Answers an offer from `from`.
    ///
    /// Returns `false` when the offer was ignored because of glare.
    #[instrument(skip(self, offer, media, channel))]
    pub async fn handle_incoming_offer(
        &mut self,
        from: &str,
        round: OfferRound,
        offer: SessionDescription,
        media: &mut TrackManager,
        channel: &dyn SignalingChannel,
        share_on_answer: bool,
    ) -> Result<bool> {
        if round == OfferRound::Renegotiation && !self.established {
            info!("renegotiation offer from {} without a call, ignored", from);
            return Ok(false);
        }

        match self.state {
            NegotiationState::Idle | NegotiationState::Stable => {}
            NegotiationState::OfferPending => {
                if !self.is_polite(from) {
                    info!("glare with {}: keeping our offer", from);
                    return Ok(false);
                }
                info!("glare with {}: rolling back our offer", from);
                if let Some(transport) = &self.transport {
                    transport.rollback().await?;
                }
                if self.offer_kind == Some(OfferKind::Renegotiation) {
                    self.renegotiation_pending = true;
                }
                self.offer_kind = None;
                self.offer_sent_at = None;
                self.state = self.resting_state();
            }
            NegotiationState::AnswerPending => {
                return Err(Error::InvalidState(
                    "offer arrived while answering another".into(),
                ));
            }
        }

        if !self.established {
            media.acquire_camera_and_mic().await?;
        }

        let previous = self.state;
        self.state = NegotiationState::AnswerPending;
        let answered = async {
            let transport = self.ensure_transport().await?;
            let answer = Self::make_answer(&*transport, offer).await?;
            let reply = match round {
                OfferRound::Call => Outbound::CallAnswer {
                    to: from.to_owned(),
                    answer,
                },
                OfferRound::Renegotiation => Outbound::RenegoAnswer {
                    to: from.to_owned(),
                    answer,
                },
            };
            channel.send(reply)?;
            Ok::<_, Error>(transport)
        }
        .await;

        let transport = match answered {
            Ok(transport) => transport,
            Err(e) => {
                warn!("answering {} failed: {}", from, e);
                if self.established {
                    if let Some(transport) = &self.transport {
                        if let Err(e) = transport.rollback().await {
                            debug!("rollback after failed answer: {}", e);
                        }
                    }
                    self.state = previous;
                } else {
                    self.teardown().await;
                }
                return Err(e);
            }
        };

        self.state = NegotiationState::Stable;
        let first = !self.established;
        self.established = true;
        info!("answered {} offer from {}", if first { "call" } else { "renegotiation" }, from);

        if first && share_on_answer {
            if let Err(e) = media.attach_camera(&*transport).await {
                warn!("could not share camera after answering: {}", e);
            }
        }

        self.replay_pending(from, channel).await?;
        Ok(true)
    }

    /// Applies the peer's answer to our outstanding offer.
    ///
    /// Returns `false` for answers that match no outstanding offer.
    #[instrument(skip(self, answer, media, channel))]
    pub async fn handle_incoming_answer(
        &mut self,
        from: &str,
        answer: SessionDescription,
        media: &mut TrackManager,
        channel: &dyn SignalingChannel,
    ) -> Result<bool> {
        if self.state != NegotiationState::OfferPending {
            debug!("ignoring answer from {} while {:?}", from, self.state);
            return Ok(false);
        }
        let Some(transport) = self.transport.clone() else {
            return Err(Error::InvalidState("answer without a transport".into()));
        };

        if let Err(e) = transport.set_remote_description(answer).await {
            warn!("applying answer from {} failed: {}", from, e);
            self.abandon_offer().await;
            return Err(e);
        }

        let kind = self.offer_kind.take();
        self.offer_sent_at = None;
        self.state = NegotiationState::Stable;
        self.established = true;
        info!("answer from {} applied", from);

        if kind == Some(OfferKind::Initial) {
            if let Err(e) = media.attach_camera(&*transport).await {
                warn!("could not share camera after call was accepted: {}", e);
            }
        }

        self.replay_pending(from, channel).await?;
        Ok(true)
    }

    /// Transport asked for a new offer
    pub async fn on_negotiation_needed(
        &mut self,
        remote_id: Option<&str>,
        channel: &dyn SignalingChannel,
    ) -> Result<()> {
        if self.transport.is_none() {
            debug!("negotiation needed without a transport, ignored");
            return Ok(());
        }
        if !self.established || self.state != NegotiationState::Stable {
            debug!("negotiation needed while {:?}, deferred", self.state);
            self.renegotiation_pending = true;
            return Ok(());
        }
        let Some(remote_id) = remote_id else {
            debug!("negotiation needed without a remote, ignored");
            return Ok(());
        };
        self.renegotiate(remote_id, channel).await
    }

    async fn replay_pending(&mut self, remote_id: &str, channel: &dyn SignalingChannel) -> Result<()> {
        if self.renegotiation_pending && self.state == NegotiationState::Stable {
            self.renegotiation_pending = false;
            debug!("replaying deferred renegotiation");
            self.renegotiate(remote_id, channel).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, channel))]
    async fn renegotiate(&mut self, remote_id: &str, channel: &dyn SignalingChannel) -> Result<()> {
        let Some(transport) = self.transport.clone() else {
            return Ok(());
        };
        let sent = async {
            let offer = Self::make_offer(&*transport).await?;
            channel.send(Outbound::RenegoOffer {
                to: remote_id.to_owned(),
                offer,
            })
        }
        .await;

        match sent {
            Ok(()) => {
                self.state = NegotiationState::OfferPending;
                self.offer_kind = Some(OfferKind::Renegotiation);
                self.offer_sent_at = Some(Instant::now());
                info!("renegotiation offer sent to {}", remote_id);
                Ok(())
            }
            Err(e) => {
                warn!("renegotiation with {} failed: {}", remote_id, e);
                if let Err(e) = transport.rollback().await {
                    debug!("rollback after failed renegotiation: {}", e);
                }
                self.state = NegotiationState::Stable;
                Err(e)
            }
        }
    }

    /// Drops the outstanding offer, back to where we were before it
    async fn abandon_offer(&mut self) {
        match self.offer_kind.take() {
            Some(OfferKind::Renegotiation) => {
                if let Some(transport) = &self.transport {
                    if let Err(e) = transport.rollback().await {
                        debug!("rollback of abandoned offer: {}", e);
                    }
                }
                self.offer_sent_at = None;
                self.state = NegotiationState::Stable;
            }
            _ => self.teardown().await,
        }
    }

    /// When the outstanding offer times out, if a timeout is configured
    pub fn timeout_deadline(&self) -> Option<Instant> {
        match (self.state, self.offer_sent_at, self.timeout) {
            (NegotiationState::OfferPending, Some(sent), Some(timeout)) => Some(sent + timeout),
            _ => None,
        }
    }

    /// Abandons an offer that has waited past its deadline
    pub async fn check_timeout(&mut self) -> Result<()> {
        let Some(deadline) = self.timeout_deadline() else {
            return Ok(());
        };
        if Instant::now() < deadline {
            return Ok(());
        }
        warn!("offer was not answered in time");
        self.abandon_offer().await;
        Err(Error::Negotiation("offer was not answered in time".into()))
    }

    /// Next event from the transport; pending while there is none
    pub async fn next_event(&mut self) -> TransportEvent {
        if let Some(events) = self.events.as_mut() {
            if let Some(event) = events.recv().await {
                return event;
            }
        }
        std::future::pending().await
    }

    pub fn try_next_event(&mut self) -> Option<TransportEvent> {
        self.events.as_mut()?.try_recv().ok()
    }

    /// Returns `false` for a track we already had
    pub fn remote_track_added(&mut self, track: RemoteTrack) -> bool {
        self.remote_stream.add(track)
    }

    pub fn remote_track_ended(&mut self, track_id: &str) -> Option<RemoteTrack> {
        self.remote_stream.remove(track_id)
    }

    /// Takes the transport without closing it
    pub fn detach_transport(&mut self) -> Option<Arc<dyn Transport>> {
        self.events = None;
        self.transport.take()
    }

    /// Closes the transport and forgets everything about the call
    pub async fn teardown(&mut self) {
        if let Some(transport) = self.detach_transport() {
            if let Err(e) = transport.close().await {
                warn!("closing transport: {}", e);
            }
        }
        let dropped = self.remote_stream.clear();
        if dropped > 0 {
            debug!("cleared {} remote tracks", dropped);
        }
        self.state = NegotiationState::Idle;
        self.offer_kind = None;
        self.offer_sent_at = None;
        self.renegotiation_pending = false;
        self.established = false;
    }
}
