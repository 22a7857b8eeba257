//! Media handles shared with the capture and rendering collaborators
//!
//! Capture itself is external; the core only moves track handles between
//! sessions and exposes remote streams to the UI.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Outgoing track handle
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Live local source: microphone and camera (or the current presentation source)
#[derive(Clone, Default)]
pub struct LocalMedia {
    audio: Option<LocalTrack>,
    video: Option<LocalTrack>,
}

impl LocalMedia {
    pub fn new(audio: Option<LocalTrack>, video: Option<LocalTrack>) -> Self {
        Self { audio, video }
    }

    pub fn audio(&self) -> Option<&LocalTrack> {
        self.audio.as_ref()
    }

    pub fn video(&self) -> Option<&LocalTrack> {
        self.video.as_ref()
    }

    pub fn set_video(&mut self, video: Option<LocalTrack>) -> Option<LocalTrack> {
        std::mem::replace(&mut self.video, video)
    }

    /// Tracks in attach order (audio first)
    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.audio.iter().chain(self.video.iter()).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("audio", &self.audio.as_ref().map(|t| t.id().to_owned()))
            .field("video", &self.video.as_ref().map(|t| t.id().to_owned()))
            .finish()
    }
}

pub fn is_video(track: &LocalTrack) -> bool {
    track.kind() == RTPCodecType::Video
}

/// Remote media stream as materialized for one peer
#[derive(Clone)]
pub struct RemoteStream {
    id: String,
    tracks: Vec<Arc<TrackRemote>>,
}

impl RemoteStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_track(id: impl Into<String>, track: Arc<TrackRemote>) -> Self {
        Self {
            id: id.into(),
            tracks: vec![track],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<TrackRemote>] {
        &self.tracks
    }

    /// Folds another announcement for the same stream into this one
    pub fn merge(&mut self, other: RemoteStream) {
        if other.id == self.id {
            self.tracks.extend(other.tracks);
        } else {
            *self = other;
        }
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Provider of the substitute video source used while presenting
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Acquire the presentation track
    async fn start(&self) -> Result<LocalTrack>;

    /// Release the presentation source
    async fn stop(&self);
}
