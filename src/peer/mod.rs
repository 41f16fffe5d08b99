pub mod connection;
pub mod memory;
pub mod negotiation;
pub mod transport;
pub mod types;

pub use connection::{WebRtcTransport, WebRtcTransportFactory};
pub use memory::{FailPoint, MemoryTransport, MemoryTransportFactory};
pub use negotiation::{NegotiationState, Negotiator, OfferRound};
pub use transport::{Transport, TransportFactory, TransportLink};
pub use types::{
    ConnectionState, RemoteStream, RemoteTrack, SdpType, SenderId, SessionDescription,
    TransportEvent,
};
