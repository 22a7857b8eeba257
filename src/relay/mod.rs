//! Relay boundary: the message channel used to bootstrap peer connections
//!
//! A link is a process-wide resource. The mesh subscribes to it and sends
//! through it but never owns its connect/disconnect lifecycle.

pub mod loopback;
pub mod messages;
pub mod ws;

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

pub use self::loopback::{LoopbackHub, LoopbackRelay};
pub use self::messages::{ClientMessage, RosterEntry, ServerMessage};
pub use self::ws::WsRelay;

/// Inbound frames buffered per subscriber before it starts lagging
pub(crate) const INBOUND_CAPACITY: usize = 1024;

#[async_trait]
pub trait RelayLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Connect if needed; connecting an open link is a no-op
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self);

    async fn send(&self, msg: ClientMessage) -> Result<()>;

    /// Every inbound message from now on. Several subscribers may share a link.
    fn subscribe(&self) -> broadcast::Receiver<ServerMessage>;
}
