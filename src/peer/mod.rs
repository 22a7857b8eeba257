pub mod connection;
pub mod ice;
pub mod state;
pub mod types;

pub use connection::{PeerSession, PeerSnapshot};
pub use ice::CandidateQueue;
pub use state::{SignalingEvent, SignalingState, TransportState};
pub use types::{IceCandidate, PeerId, Presenter, SdpKind, SessionDescription};
