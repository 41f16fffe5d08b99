//! Two-party call sessions over a signaling relay.
//!
//! A [`CallSession`] joins a room through a [`SignalingChannel`], finds the
//! other participant, negotiates a peer-to-peer media transport with them
//! and keeps local capture, screen sharing and chat consistent until the
//! call ends, however it ends.

pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod media;
pub mod membership;
pub mod peer;
pub mod session;
pub mod signaling;
mod utils;

pub use chat::{ChatLog, ChatMessage, Origin};
pub use config::{ServerConfig, SessionConfig};
pub use error::{DeviceAccessError, Error, Result};
pub use events::{EventSink, SessionEvent};
pub use media::{MediaDevices, SyntheticDevices, TrackManager};
pub use membership::{Presence, RoomMembership};
pub use peer::{
    MemoryTransportFactory, NegotiationState, Negotiator, Transport, TransportFactory,
    WebRtcTransportFactory,
};
pub use session::{CallSession, CallState, Command, EndReason};
pub use signaling::relay::{LocalRelay, RelayClient};
pub use signaling::{Inbound, Outbound, SignalingChannel, Subscription};
