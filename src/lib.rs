//! Peer-mesh signaling and connection lifecycle for TipTipMeet rooms

pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod media;
pub mod mesh;
pub mod peer;
pub mod presentation;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod utils;

pub use config::{MeshConfig, ServerConfig};
pub use error::{MeshError, Result};
pub use events::{EventBus, MeshEvent, RemovalReason};
pub use media::{LocalMedia, LocalTrack, RemoteStream, ScreenCapture};
pub use mesh::Mesh;
pub use peer::{PeerId, Presenter, SignalingState};
pub use presentation::PresentationCoordinator;
pub use relay::{LoopbackHub, LoopbackRelay, RelayLink, WsRelay};
pub use session::RoomSession;
pub use signaling::SignalingAdapter;
pub use transport::{Transport, TransportFactory, WebRtcTransportFactory};
