//! Error types for the call session

/// Result type alias using the session [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Why local capture could not be obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeviceAccessError {
    /// The user (or platform policy) refused access
    #[error("permission denied")]
    PermissionDenied,

    /// No capture device of the requested kind exists
    #[error("no device available")]
    NotFound,
}

/// Errors that can occur while running a call session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera, microphone or screen capture could not be acquired
    #[error("Device access error: {0}")]
    DeviceAccess(#[from] DeviceAccessError),

    /// Offer/answer production or description application failed
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Inbound signaling payload had an unexpected shape
    #[error("Invalid message payload: {0}")]
    InvalidMessagePayload(String),

    /// The connection to the signaling relay was lost
    #[error("Signaling channel disconnected")]
    ChannelDisconnected,

    /// Operation is not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation needs a bound remote participant
    #[error("No remote participant in the room")]
    NoRemoteParticipant,

    /// Media transport failure outside of negotiation
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error reported by the WebRTC stack
    #[error("WebRTC error: {0}")]
    Webrtc(#[from] webrtc::Error),
}

impl Error {
    /// Errors that abort the current call start or renegotiation attempt
    /// while leaving the session usable.
    pub fn is_fatal_for_attempt(&self) -> bool {
        matches!(
            self,
            Error::DeviceAccess(_) | Error::Negotiation(_) | Error::Webrtc(_)
        )
    }

    /// Errors that must end the session.
    pub fn ends_session(&self) -> bool {
        matches!(self, Error::ChannelDisconnected)
    }
}
