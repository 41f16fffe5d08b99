//! Local capture devices
//!
//! [`MediaDevices`] is the boundary to whatever owns the camera, microphone
//! and screen capture on this platform. [`SyntheticDevices`] hands out
//! generated tracks and can be told to refuse access.

use super::track::{LocalTrack, MediaStream, TrackKind};
use crate::error::{DeviceAccessError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a camera/microphone request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub const CAMERA_AND_MIC: Self = Self {
        audio: true,
        video: true,
    };
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Camera and/or microphone capture
    async fn user_media(&self, constraints: MediaConstraints) -> Result<MediaStream>;

    /// Screen capture (video, plus system audio when the platform offers it)
    async fn display_media(&self) -> Result<MediaStream>;
}

/// Generated devices with switchable permissions
#[derive(Default)]
pub struct SyntheticDevices {
    camera_denied: Mutex<Option<DeviceAccessError>>,
    screen_denied: Mutex<Option<DeviceAccessError>>,
    screen_audio: bool,
    user_media_requests: AtomicUsize,
    display_media_requests: AtomicUsize,
    issued: Mutex<Vec<MediaStream>>,
}

impl SyntheticDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Screen captures also carry a system-audio track
    pub fn with_screen_audio() -> Arc<Self> {
        Arc::new(Self {
            screen_audio: true,
            ..Self::default()
        })
    }

    pub fn deny_camera(&self, reason: Option<DeviceAccessError>) {
        *self.camera_denied.lock() = reason;
    }

    pub fn deny_screen(&self, reason: Option<DeviceAccessError>) {
        *self.screen_denied.lock() = reason;
    }

    pub fn user_media_requests(&self) -> usize {
        self.user_media_requests.load(Ordering::SeqCst)
    }

    pub fn display_media_requests(&self) -> usize {
        self.display_media_requests.load(Ordering::SeqCst)
    }

    /// Every stream handed out so far, oldest first
    pub fn issued(&self) -> Vec<MediaStream> {
        self.issued.lock().clone()
    }

    /// Number of issued tracks that are still capturing
    pub fn live_tracks(&self) -> usize {
        self.issued
            .lock()
            .iter()
            .flat_map(|s| s.tracks().iter())
            .filter(|t| !t.is_stopped())
            .count()
    }

    fn issue(&self, stream: MediaStream) -> MediaStream {
        self.issued.lock().push(stream.clone());
        stream
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn user_media(&self, constraints: MediaConstraints) -> Result<MediaStream> {
        self.user_media_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = *self.camera_denied.lock() {
            warn!("camera/microphone request refused: {}", reason);
            return Err(reason.into());
        }
        if !constraints.audio && !constraints.video {
            return Err(DeviceAccessError::NotFound.into());
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio, "synthetic microphone"));
        }
        if constraints.video {
            tracks.push(LocalTrack::new(TrackKind::Video, "synthetic camera"));
        }
        let stream = MediaStream::new(tracks);
        debug!("issued camera/mic stream {}", stream.id());
        Ok(self.issue(stream))
    }

    async fn display_media(&self) -> Result<MediaStream> {
        self.display_media_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = *self.screen_denied.lock() {
            warn!("screen capture request refused: {}", reason);
            return Err(reason.into());
        }

        let mut tracks = vec![LocalTrack::new(TrackKind::Video, "synthetic screen")];
        if self.screen_audio {
            tracks.push(LocalTrack::new(TrackKind::Audio, "synthetic system audio"));
        }
        let stream = MediaStream::new(tracks);
        debug!("issued screen stream {}", stream.id());
        Ok(self.issue(stream))
    }
}
