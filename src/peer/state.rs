use crate::error::{MeshError, Result};

// ========== SIGNALING STATE ==========

/// Per-session signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

/// Description-level events that drive [`SignalingState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingEvent {
    SetLocalOffer,
    SetRemoteOffer,
    SetLocalAnswer,
    SetRemoteAnswer,
    Close,
}

impl SignalingState {
    /// Single transition function; invalid events are rejected without changing state.
    ///
    /// A fresh offer on a stable session is a renegotiation and reuses the session.
    /// A pending offer may be replaced by a newer one from the same side, which
    /// lets a peer retry after a failed answer.
    pub fn apply(self, event: SignalingEvent) -> Result<SignalingState> {
        use SignalingEvent::*;
        use SignalingState::*;

        let next = match (self, event) {
            (Closed, Close) => Closed,
            (Closed, _) => return Err(MeshError::InvalidTransition { from: self, event }),
            (_, Close) => Closed,
            (New | Stable, SetLocalOffer) => HaveLocalOffer,
            (New | Stable, SetRemoteOffer) => HaveRemoteOffer,
            (HaveLocalOffer, SetLocalOffer) => HaveLocalOffer,
            (HaveRemoteOffer, SetRemoteOffer) => HaveRemoteOffer,
            (HaveRemoteOffer, SetLocalAnswer) => Stable,
            (HaveLocalOffer, SetRemoteAnswer) => Stable,
            _ => return Err(MeshError::InvalidTransition { from: self, event }),
        };
        Ok(next)
    }

    pub fn is_stable(self) -> bool {
        self == SignalingState::Stable
    }
}

// ========== TRANSPORT STATE ==========

/// Connectivity reported by the transport (ICE connection state)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// Conditions treated as a departure of the peer
    pub fn is_terminal(self) -> bool {
        matches!(self, TransportState::Disconnected | TransportState::Failed)
    }
}
