//! Error types for the mesh core

use crate::peer::state::{SignalingEvent, SignalingState};
use crate::peer::types::PeerId;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors raised by the mesh core
#[derive(Debug, Error)]
pub enum MeshError {
    /// Transport layer rejected an operation (bad description, stale candidate, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// No session is registered for the peer
    #[error("no session for peer {0}")]
    UnknownPeer(PeerId),

    /// Event is not valid for the current signaling state
    #[error("invalid signaling transition: {event:?} in state {from:?}")]
    InvalidTransition {
        /// State the session was in
        from: SignalingState,
        /// Rejected event
        event: SignalingEvent,
    },

    /// Relay link failure
    #[error("relay error: {0}")]
    Relay(String),

    /// Relay link is not connected
    #[error("relay is not connected")]
    RelayDisconnected,

    /// Room join attempted without any local track
    #[error("local media has no tracks")]
    NoLocalMedia,

    /// Display name is empty after trimming
    #[error("display name must not be empty")]
    EmptyDisplayName,

    /// Screen capture provider failed
    #[error("capture error: {0}")]
    Capture(String),

    /// Invalid client configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation requires an active room
    #[error("not joined to a room")]
    NotJoined,

    /// JSON encode/decode failure
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<webrtc::Error> for MeshError {
    fn from(err: webrtc::Error) -> Self {
        MeshError::Transport(err.to_string())
    }
}
