//! The media transport seam
//!
//! One [`Transport`] is one peer connection. Sessions open a fresh one per
//! call through a [`TransportFactory`] and close it on teardown.

use super::types::{SenderId, SessionDescription, TransportEvent};
use crate::error::Result;
use crate::media::LocalTrack;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Current local description, including gathered candidates
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Drops an unanswered local offer and returns to the stable state
    async fn rollback(&self) -> Result<()>;

    async fn add_track(&self, track: &LocalTrack, stream_id: &str) -> Result<SenderId>;

    async fn remove_track(&self, sender: SenderId) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// An open transport plus the receiving end of its events
pub struct TransportLink {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self) -> Result<TransportLink>;
}
