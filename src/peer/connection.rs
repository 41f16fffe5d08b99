//! webrtc-rs backed transport

use super::transport::{Transport, TransportFactory, TransportLink};
use super::types::{
    ConnectionState, RemoteTrack, SdpType, SenderId, SessionDescription, TransportEvent,
};
use crate::config::{ServerConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::media::{LocalTrack, TrackKind};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// How long `set_local_description` waits for ICE gathering.
///
/// Candidates travel inside the description (no trickle messages on the
/// signaling channel), so gathering has to finish before it is sent.
const GATHER_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the peer connection configuration
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let ice_servers = servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![config.url_with_scheme()],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(Error::Negotiation(format!(
            "unexpected description type {}",
            other
        ))),
    }
}

fn map_state(st: RTCPeerConnectionState) -> ConnectionState {
    match st {
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => ConnectionState::New,
    }
}

/// One `RTCPeerConnection` and the local tracks published on it
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<u64, Arc<RTCRtpSender>>>,
    local_tracks: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
    next_sender: AtomicU64,
}

impl WebRtcTransport {
    /// Creates the peer connection and wires its callbacks into `events`
    pub async fn connect(
        servers: &[ServerConfig],
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await?);

        let tx = events.clone();
        pc.on_negotiation_needed(Box::new(move || {
            let _ = tx.send(TransportEvent::NegotiationNeeded);
            Box::pin(async {})
        }));

        let tx = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            let remote = RemoteTrack {
                id: track.id(),
                kind,
                stream_id: track.stream_id(),
            };
            info!("remote track {} ({:?}) arrived", remote.id, remote.kind);
            let _ = tx.send(TransportEvent::TrackAdded(remote.clone()));

            // Drain RTP until the transceiver stops; that is the end of the track
            let tx = tx.clone();
            Box::pin(async move {
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    debug!("remote track {} ended", remote.id);
                    let _ = tx.send(TransportEvent::TrackEnded(remote.id));
                });
            })
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        let tx = events;
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!("Peer connection state changed to: {:?}", st);
            if matches!(
                st,
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
            ) {
                warn!("Peer connection {:?}", st);
            }
            let _ = tx.send(TransportEvent::StateChanged(map_state(st)));
            Box::pin(async {})
        }));

        Ok(Self {
            pc,
            senders: Mutex::new(HashMap::new()),
            local_tracks: Mutex::new(HashMap::new()),
            next_sender: AtomicU64::new(1),
        })
    }

    /// Feeds one captured media sample into a published local track
    pub async fn write_sample(&self, track_id: &str, data: Bytes, duration: Duration) -> Result<()> {
        let track = self
            .local_tracks
            .lock()
            .get(track_id)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("track {} is not published", track_id)))?;
        track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(to_rtc(desc)?).await?;
        if timeout(GATHER_TIMEOUT, gathered.recv()).await.is_err() {
            warn!(
                "ICE gathering did not finish within {} s, sending what we have",
                GATHER_TIMEOUT.as_secs()
            );
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        from_rtc(desc).ok()
    }

    async fn rollback(&self) -> Result<()> {
        let rollback: RTCSessionDescription =
            serde_json::from_value(serde_json::json!({ "type": "rollback", "sdp": "" }))?;
        self.pc.set_local_description(rollback).await?;
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack, stream_id: &str) -> Result<SenderId> {
        let local = Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind()),
            track.id().to_owned(),
            stream_id.to_owned(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Read incoming RTCP so interceptors keep working
        let rtcp = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp.read(&mut buf).await.is_ok() {}
        });

        let id = self.next_sender.fetch_add(1, Ordering::SeqCst);
        self.senders.lock().insert(id, sender);
        self.local_tracks.lock().insert(track.id().to_owned(), local);
        Ok(SenderId(id))
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        let rtp_sender = self
            .senders
            .lock()
            .remove(&sender.0)
            .ok_or_else(|| Error::Transport(format!("unknown sender {:?}", sender)))?;
        if let Some(track) = rtp_sender.track().await {
            self.local_tracks.lock().remove(track.id());
        }
        self.pc.remove_track(&rtp_sender).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.senders.lock().clear();
        self.local_tracks.lock().clear();
        self.pc.close().await?;
        Ok(())
    }
}

/// Opens a [`WebRtcTransport`] per call with the configured ICE servers
pub struct WebRtcTransportFactory {
    ice_servers: Vec<ServerConfig>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Arc<Self> {
        Arc::new(Self { ice_servers })
    }

    /// Uses the ICE servers of `config`
    pub fn from_config(config: &SessionConfig) -> Arc<Self> {
        Self::new(config.ice_servers.clone())
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn open(&self) -> Result<TransportLink> {
        let (tx, events) = mpsc::unbounded_channel();
        let transport = WebRtcTransport::connect(&self.ice_servers, tx).await?;
        info!(
            "opened WebRTC transport with {} ICE servers",
            self.ice_servers.len()
        );
        Ok(TransportLink {
            transport: Arc::new(transport),
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtc_config_uses_schemes_and_credentials() {
        let servers = vec![
            ServerConfig::stun("s", "stun.example.org:3478"),
            ServerConfig {
                id: "t".into(),
                r#type: "turn".into(),
                url: "turn.example.org:3478".into(),
                username: Some("user".into()),
                credential: Some("secret".into()),
            },
        ];
        let cfg = rtc_config(&servers);
        assert_eq!(cfg.ice_servers.len(), 2);
        assert_eq!(cfg.ice_servers[0].urls, vec!["stun:stun.example.org:3478"]);
        assert_eq!(cfg.ice_servers[1].urls, vec!["turn:turn.example.org:3478"]);
        assert_eq!(cfg.ice_servers[1].username, "user");
    }

    #[test]
    fn test_factory_takes_servers_from_config() {
        let config = SessionConfig {
            ice_servers: vec![ServerConfig::stun("s", "stun.example.org:3478")],
            ..SessionConfig::default()
        };
        let factory = WebRtcTransportFactory::from_config(&config);
        assert_eq!(factory.ice_servers.len(), 1);
        assert_eq!(factory.ice_servers[0].url, "stun.example.org:3478");
    }

    #[test]
    fn test_codecs_per_kind() {
        assert_eq!(codec_for(TrackKind::Audio).mime_type, MIME_TYPE_OPUS);
        assert_eq!(codec_for(TrackKind::Video).clock_rate, 90000);
    }

    #[tokio::test]
    async fn test_published_track_appears_in_offer() {
        let factory = WebRtcTransportFactory::new(Vec::new());
        let link = factory.open().await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = WebRtcTransport::connect(&[], tx).await.unwrap();

        let mic = LocalTrack::new(TrackKind::Audio, "mic");
        let sender = transport.add_track(&mic, "stream").await.unwrap();
        let offer = transport.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));

        transport
            .write_sample(mic.id(), Bytes::from_static(&[0u8; 4]), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(transport
            .write_sample("missing", Bytes::new(), Duration::from_millis(20))
            .await
            .is_err());

        transport.remove_track(sender).await.unwrap();
        transport.close().await.unwrap();
        link.transport.close().await.unwrap();
    }
}
