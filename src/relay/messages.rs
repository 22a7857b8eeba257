//! Relay wire frames: `{"event": <name>, "data": <payload>}` JSON text

use crate::error::Result;
use crate::peer::types::{IceCandidate, PeerId, SessionDescription};
use serde::{Deserialize, Serialize};

/// One entry of the roster snapshot sent to a joining client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub socket_id: PeerId,
    #[serde(default)]
    pub user_name: String,
}

/// Client to relay
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    JoinRoom {
        slug: String,
        user_name: String,
    },
    Offer {
        target: PeerId,
        sdp: SessionDescription,
    },
    Answer {
        target: PeerId,
        sdp: SessionDescription,
    },
    IceCandidate {
        target: PeerId,
        candidate: IceCandidate,
    },
    ScreenShareStarted {
        slug: String,
    },
    ScreenShareStopped {
        slug: String,
    },
}

impl ClientMessage {
    pub fn event(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::ScreenShareStarted { .. } => "screen-share-started",
            Self::ScreenShareStopped { .. } => "screen-share-stopped",
        }
    }
}

/// Relay to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Roster snapshot, excluding the receiver
    AllUsers(Vec<RosterEntry>),
    Offer {
        sdp: SessionDescription,
        caller: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caller_name: Option<String>,
    },
    Answer {
        sdp: SessionDescription,
        answerer: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answerer_name: Option<String>,
    },
    IceCandidate {
        candidate: IceCandidate,
        from: PeerId,
    },
    UserJoined {
        socket_id: PeerId,
        #[serde(default)]
        user_name: String,
    },
    UserLeft {
        socket_id: PeerId,
    },
    ScreenShareStarted {
        socket_id: PeerId,
    },
    ScreenShareStopped {
        socket_id: PeerId,
    },
}

impl ServerMessage {
    pub fn event(&self) -> &'static str {
        match self {
            Self::AllUsers(_) => "all-users",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::ScreenShareStarted { .. } => "screen-share-started",
            Self::ScreenShareStopped { .. } => "screen-share-stopped",
        }
    }

    /// The single peer this message is about, if any
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            Self::AllUsers(_) => None,
            Self::Offer { caller, .. } => Some(caller),
            Self::Answer { answerer, .. } => Some(answerer),
            Self::IceCandidate { from, .. } => Some(from),
            Self::UserJoined { socket_id, .. }
            | Self::UserLeft { socket_id }
            | Self::ScreenShareStarted { socket_id }
            | Self::ScreenShareStopped { socket_id } => Some(socket_id),
        }
    }
}

pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

pub fn decode_server(text: &str) -> Result<ServerMessage> {
    Ok(serde_json::from_str(text)?)
}

pub fn decode_client(text: &str) -> Result<ClientMessage> {
    Ok(serde_json::from_str(text)?)
}
