//! Observable boundary towards the UI
//!
//! Membership, media and presentation changes are broadcast as [`MeshEvent`]s;
//! a lagging subscriber loses old events but can always re-read the mesh
//! snapshot accessors.

use crate::media::RemoteStream;
use crate::peer::types::{PeerId, Presenter};
use crate::peer::state::TransportState;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CAPACITY: usize = 256;

/// Why a peer left the mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    /// Relay reported the departure
    Left,
    /// Transport reported a terminal condition
    ConnectionLost(TransportState),
    /// Local mesh teardown
    Teardown,
}

#[derive(Debug, Clone)]
pub enum MeshEvent {
    SessionCreated { peer: PeerId },
    SessionStable { peer: PeerId },
    RemoteStream { peer: PeerId, stream: RemoteStream },
    NameUpdated { peer: PeerId, name: String },
    PeerRemoved { peer: PeerId, reason: RemovalReason },
    PresenterChanged(Presenter),
    NegotiationFailed { peer: PeerId, message: String },
}

impl MeshEvent {
    /// Event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::SessionStable { .. } => "session_stable",
            Self::RemoteStream { .. } => "remote_stream",
            Self::NameUpdated { .. } => "name_updated",
            Self::PeerRemoved { .. } => "peer_removed",
            Self::PresenterChanged(_) => "presenter_changed",
            Self::NegotiationFailed { .. } => "negotiation_failed",
        }
    }
}

/// Fan-out of [`MeshEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MeshEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: MeshEvent) {
        trace!(event = event.name(), "emit");
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}
