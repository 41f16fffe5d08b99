//! Local media lifecycle
//!
//! The manager owns the camera/microphone stream, the screen-share stream
//! and the registry of tracks attached to the current transport. Every
//! track it ever attaches goes through the registry, so repeated or
//! overlapping attach requests never add a track twice.

use super::devices::{MediaConstraints, MediaDevices};
use super::registry::AttachedTrackRegistry;
use super::track::{MediaStream, TrackKind};
use crate::error::{Error, Result};
use crate::peer::Transport;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct ScreenShare {
    stream: MediaStream,
    ended: watch::Receiver<bool>,
}

pub struct TrackManager {
    devices: Arc<dyn MediaDevices>,
    camera: Option<MediaStream>,
    screen: Option<ScreenShare>,
    registry: AttachedTrackRegistry,
    audio_muted: bool,
    video_stopped: bool,
}

impl TrackManager {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            camera: None,
            screen: None,
            registry: AttachedTrackRegistry::new(),
            audio_muted: false,
            video_stopped: false,
        }
    }

    /// Returns the held camera/mic stream, requesting capture only if none is held
    pub async fn acquire_camera_and_mic(&mut self) -> Result<MediaStream> {
        if let Some(stream) = &self.camera {
            return Ok(stream.clone());
        }
        let stream = self
            .devices
            .user_media(MediaConstraints::CAMERA_AND_MIC)
            .await?;
        info!(
            "acquired camera/mic stream {} ({} tracks)",
            stream.id(),
            stream.tracks().len()
        );
        self.camera = Some(stream.clone());
        Ok(stream)
    }

    /// Attaches every track of `stream` that is not attached yet.
    ///
    /// Returns the number of newly attached tracks.
    pub async fn attach_local_tracks(
        &mut self,
        stream: &MediaStream,
        transport: &dyn Transport,
    ) -> Result<usize> {
        let mut attached = 0;
        for track in stream.tracks() {
            if self.registry.contains(track.id()) {
                debug!("skipping already attached track {}", track.id());
                continue;
            }
            let sender = transport.add_track(track, stream.id()).await?;
            // Another attach may have raced us across the await
            if self.registry.attach(track.id(), sender) {
                attached += 1;
            } else if let Err(e) = transport.remove_track(sender).await {
                warn!("failed to drop duplicate sender for {}: {}", track.id(), e);
            }
        }
        if attached > 0 {
            info!("attached {} local tracks from {}", attached, stream.id());
        }
        Ok(attached)
    }

    /// Attaches the held camera/mic stream, if any
    pub async fn attach_camera(&mut self, transport: &dyn Transport) -> Result<usize> {
        match self.camera.clone() {
            Some(stream) => self.attach_local_tracks(&stream, transport).await,
            None => Ok(0),
        }
    }

    /// Starts or stops screen sharing, returning the new sharing state.
    ///
    /// Starting needs an open transport; stopping works with or without one.
    pub async fn toggle_screen_share(&mut self, transport: Option<&dyn Transport>) -> Result<bool> {
        if self.screen.is_some() {
            self.stop_screen_share(transport).await;
            return Ok(false);
        }

        let transport = transport
            .ok_or_else(|| Error::InvalidState("screen share needs an open call".into()))?;
        let stream = self.devices.display_media().await?;

        if let Err(e) = self.attach_local_tracks(&stream, transport).await {
            warn!("screen share attach failed: {}", e);
            self.detach_stream(&stream, Some(transport)).await;
            stream.stop_all();
            return Err(e);
        }

        // The video track ending is what the platform "stop sharing" control does
        let ended = match stream.tracks_of(TrackKind::Video).next() {
            Some(track) => track.ended(),
            None => watch::channel(false).1,
        };
        info!("screen share {} started", stream.id());
        self.screen = Some(ScreenShare { stream, ended });
        Ok(true)
    }

    /// Ends screen sharing. Returns `false` if nothing was being shared.
    ///
    /// Detach failures are logged; the local state always ends up inactive.
    pub async fn stop_screen_share(&mut self, transport: Option<&dyn Transport>) -> bool {
        let Some(share) = self.screen.take() else {
            debug!("no screen share to stop");
            return false;
        };
        self.detach_stream(&share.stream, transport).await;
        share.stream.stop_all();
        info!("screen share {} stopped", share.stream.id());
        true
    }

    async fn detach_stream(&mut self, stream: &MediaStream, transport: Option<&dyn Transport>) {
        for track in stream.tracks() {
            let Some(sender) = self.registry.detach(track.id()) else {
                continue;
            };
            if let Some(transport) = transport {
                if let Err(e) = transport.remove_track(sender).await {
                    warn!("failed to detach track {}: {}", track.id(), e);
                }
            }
        }
    }

    /// True once the platform has ended the current screen capture
    pub fn capture_has_ended(&self) -> bool {
        self.screen
            .as_ref()
            .map(|share| *share.ended.borrow())
            .unwrap_or(false)
    }

    /// Resolves when the current screen capture ends. Pending forever while
    /// nothing is shared.
    pub async fn capture_ended(&mut self) {
        match self.screen.as_mut() {
            Some(share) => {
                if share.ended.wait_for(|ended| *ended).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Flips the microphone, returning whether audio is now muted
    pub fn toggle_audio_mute(&mut self) -> bool {
        let Some(stream) = &self.camera else {
            return self.audio_muted;
        };
        let muted = !self.audio_muted;
        for track in stream.tracks_of(TrackKind::Audio) {
            track.set_enabled(!muted);
        }
        self.audio_muted = muted;
        debug!("audio muted: {}", muted);
        muted
    }

    /// Flips the camera, returning whether video is now stopped
    pub fn toggle_video_stop(&mut self) -> bool {
        let Some(stream) = &self.camera else {
            return self.video_stopped;
        };
        let stopped = !self.video_stopped;
        for track in stream.tracks_of(TrackKind::Video) {
            track.set_enabled(!stopped);
        }
        self.video_stopped = stopped;
        debug!("video stopped: {}", stopped);
        stopped
    }

    /// Stops every held track and forgets all attachments.
    ///
    /// Returns the number of tracks this call actually stopped.
    pub fn release_all(&mut self) -> usize {
        let mut stopped = 0;
        if let Some(stream) = self.camera.take() {
            stopped += stream.stop_all();
        }
        if let Some(share) = self.screen.take() {
            stopped += share.stream.stop_all();
        }
        let detached = self.registry.clear();
        self.audio_muted = false;
        self.video_stopped = false;
        if stopped > 0 || detached > 0 {
            info!("released {} tracks, cleared {} attachments", stopped, detached);
        }
        stopped
    }

    pub fn registry(&self) -> &AttachedTrackRegistry {
        &self.registry
    }

    pub fn camera(&self) -> Option<&MediaStream> {
        self.camera.as_ref()
    }

    pub fn screen(&self) -> Option<&MediaStream> {
        self.screen.as_ref().map(|share| &share.stream)
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn has_media(&self) -> bool {
        self.camera.is_some() || self.screen.is_some()
    }

    pub fn is_audio_muted(&self) -> bool {
        self.audio_muted
    }

    pub fn is_video_stopped(&self) -> bool {
        self.video_stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceAccessError;
    use crate::media::SyntheticDevices;
    use crate::peer::{FailPoint, MemoryTransport};

    fn manager() -> (TrackManager, Arc<SyntheticDevices>) {
        let devices = SyntheticDevices::new();
        (TrackManager::new(devices.clone()), devices)
    }

    #[tokio::test]
    async fn test_acquire_is_idempotent() {
        let (mut media, devices) = manager();
        let first = media.acquire_camera_and_mic().await.unwrap();
        let second = media.acquire_camera_and_mic().await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(devices.user_media_requests(), 1);
    }

    #[tokio::test]
    async fn test_repeated_attach_adds_each_track_once() {
        let (mut media, _devices) = manager();
        let (transport, _rx) = MemoryTransport::new();
        let stream = media.acquire_camera_and_mic().await.unwrap();

        assert_eq!(media.attach_local_tracks(&stream, &*transport).await.unwrap(), 2);
        assert_eq!(media.attach_local_tracks(&stream, &*transport).await.unwrap(), 0);
        assert_eq!(media.attach_camera(&*transport).await.unwrap(), 0);
        assert_eq!(transport.sender_count(), 2);
        assert_eq!(media.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_screen_share_start_then_stop() {
        let (mut media, devices) = manager();
        let (transport, _rx) = MemoryTransport::new();

        assert!(media.toggle_screen_share(Some(&*transport)).await.unwrap());
        assert!(media.is_screen_sharing());
        assert_eq!(transport.sender_count(), 1);

        assert!(!media.toggle_screen_share(Some(&*transport)).await.unwrap());
        assert!(!media.is_screen_sharing());
        assert!(media.registry().is_empty());
        assert_eq!(transport.sender_count(), 0);
        assert_eq!(devices.live_tracks(), 0);
    }

    #[tokio::test]
    async fn test_screen_share_needs_transport() {
        let (mut media, devices) = manager();
        let err = media.toggle_screen_share(None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(devices.display_media_requests(), 0);
    }

    #[tokio::test]
    async fn test_denied_screen_leaves_state_inactive() {
        let (mut media, devices) = manager();
        let (transport, _rx) = MemoryTransport::new();
        devices.deny_screen(Some(DeviceAccessError::PermissionDenied));
        assert!(media.toggle_screen_share(Some(&*transport)).await.is_err());
        assert!(!media.is_screen_sharing());
    }

    #[tokio::test]
    async fn test_failed_screen_attach_releases_capture() {
        let (mut media, devices) = manager();
        let (transport, _rx) = MemoryTransport::new();
        transport.fail_next(FailPoint::AddTrack);
        assert!(media.toggle_screen_share(Some(&*transport)).await.is_err());
        assert!(!media.is_screen_sharing());
        assert_eq!(devices.live_tracks(), 0);
    }

    #[tokio::test]
    async fn test_capture_ended_converges_with_stop() {
        let (mut media, _devices) = manager();
        let (transport, _rx) = MemoryTransport::new();
        media.toggle_screen_share(Some(&*transport)).await.unwrap();
        assert!(!media.capture_has_ended());

        let track = media.screen().unwrap().tracks()[0].clone();
        track.end_from_platform();
        assert!(media.capture_has_ended());
        media.capture_ended().await;

        assert!(media.stop_screen_share(Some(&*transport)).await);
        assert!(media.registry().is_empty());
        // A late notice for the same capture changes nothing
        assert!(!media.capture_has_ended());
        assert!(!media.stop_screen_share(Some(&*transport)).await);
    }

    #[tokio::test]
    async fn test_mute_toggles_flip_enabled_only() {
        let (mut media, _devices) = manager();
        assert!(!media.toggle_audio_mute());

        let (transport, mut rx) = MemoryTransport::new();
        let stream = media.acquire_camera_and_mic().await.unwrap();
        media.attach_local_tracks(&stream, &*transport).await.unwrap();
        while rx.try_recv().is_ok() {}

        assert!(media.toggle_audio_mute());
        assert!(stream.tracks_of(TrackKind::Audio).all(|t| !t.is_enabled()));
        assert!(stream.tracks_of(TrackKind::Video).all(|t| t.is_enabled()));
        assert!(media.toggle_video_stop());
        assert!(!media.toggle_audio_mute());

        assert_eq!(media.registry().len(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_release_all_only_stops_once() {
        let (mut media, devices) = manager();
        let (transport, _rx) = MemoryTransport::new();
        let stream = media.acquire_camera_and_mic().await.unwrap();
        media.attach_local_tracks(&stream, &*transport).await.unwrap();
        media.toggle_screen_share(Some(&*transport)).await.unwrap();

        assert_eq!(media.release_all(), 3);
        assert_eq!(media.release_all(), 0);
        assert!(media.registry().is_empty());
        assert!(!media.is_screen_sharing());
        assert_eq!(devices.live_tracks(), 0);
    }
}
