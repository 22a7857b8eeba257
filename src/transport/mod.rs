//! Transport seam: one direct media session with one remote peer
//!
//! The mesh only talks to [`Transport`]; the production implementation wraps a
//! `webrtc` peer connection, tests use the scriptable fake.

pub mod rtc;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

use crate::error::Result;
use crate::media::{LocalTrack, RemoteStream};
use crate::peer::state::TransportState;
use crate::peer::types::{IceCandidate, PeerId, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use self::rtc::WebRtcTransportFactory;

/// Bidirectional media transport for one peer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attach an outgoing track (creates a sender)
    async fn add_track(&self, track: LocalTrack) -> Result<()>;

    /// Swap the track carried by the outgoing video sender.
    ///
    /// Returns `false` when the session has no video sender.
    async fn replace_video_track(&self, track: Option<LocalTrack>) -> Result<bool>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates transports wired to the mesh callback channel
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, peer: &PeerId, events: TransportEvents) -> Result<Arc<dyn Transport>>;
}

/// Asynchronous callback raised by a transport
#[derive(Debug, Clone)]
pub enum TransportEventKind {
    /// New local network candidate discovered; to be sent to the peer
    LocalCandidate(IceCandidate),
    /// Remote media arrived
    RemoteStream(RemoteStream),
    /// Connectivity changed
    StateChanged(TransportState),
}

/// Callback tagged with the session generation that produced it
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub peer: PeerId,
    pub generation: u64,
    pub kind: TransportEventKind,
}

/// Sink handed to a transport at creation time
#[derive(Debug, Clone)]
pub struct TransportEvents {
    peer: PeerId,
    generation: u64,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEvents {
    pub fn new(peer: PeerId, generation: u64, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            peer,
            generation,
            tx,
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(TransportEventKind::LocalCandidate(candidate));
    }

    pub fn remote_stream(&self, stream: RemoteStream) {
        self.emit(TransportEventKind::RemoteStream(stream));
    }

    pub fn state_changed(&self, state: TransportState) {
        self.emit(TransportEventKind::StateChanged(state));
    }

    fn emit(&self, kind: TransportEventKind) {
        // receiver gone means the mesh was torn down
        let _ = self.tx.send(TransportEvent {
            peer: self.peer.clone(),
            generation: self.generation,
            kind,
        });
    }
}
