//! Presentation coordinator
//!
//! Owns the local "am I presenting" flag and is the only place that swaps the
//! outgoing video source. Remote announcements are last-writer-wins.

use crate::error::Result;
use crate::media::{LocalTrack, ScreenCapture};
use crate::mesh::Mesh;
use crate::peer::types::{PeerId, Presenter};
use crate::relay::{ClientMessage, RelayLink};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Inner {
    mesh: Mesh,
    relay: Arc<dyn RelayLink>,
    capture: Arc<dyn ScreenCapture>,
    room: String,
    camera: Option<LocalTrack>,
    // serializes start/stop across their suspend points
    presenting: Mutex<bool>,
}

#[derive(Clone)]
pub struct PresentationCoordinator {
    inner: Arc<Inner>,
}

impl PresentationCoordinator {
    /// `camera` is the video track restored when presenting stops
    pub fn new(
        mesh: Mesh,
        relay: Arc<dyn RelayLink>,
        capture: Arc<dyn ScreenCapture>,
        room: impl Into<String>,
        camera: Option<LocalTrack>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                mesh,
                relay,
                capture,
                room: room.into(),
                camera,
                presenting: Mutex::new(false),
            }),
        }
    }

    pub async fn is_presenting(&self) -> bool {
        *self.inner.presenting.lock().await
    }

    /// Swaps every session to the capture source and announces it
    pub async fn start_presenting(&self) -> Result<()> {
        let mut presenting = self.inner.presenting.lock().await;
        if *presenting {
            return Ok(());
        }

        let track = self.inner.capture.start().await?;
        let replaced = self.inner.mesh.replace_outgoing_video(Some(track)).await;
        *presenting = true;
        self.inner.mesh.set_presenter(Presenter::Local);
        info!(sessions = replaced, "started presenting");

        self.announce(ClientMessage::ScreenShareStarted {
            slug: self.inner.room.clone(),
        })
        .await;
        Ok(())
    }

    /// Restores the camera on every session and announces the stop
    pub async fn stop_presenting(&self) -> Result<()> {
        let mut presenting = self.inner.presenting.lock().await;
        if !*presenting {
            return Ok(());
        }

        let restored = self
            .inner
            .mesh
            .replace_outgoing_video(self.inner.camera.clone())
            .await;
        *presenting = false;
        self.inner.mesh.clear_presenter_if(&Presenter::Local);
        info!(sessions = restored, "stopped presenting");

        self.announce(ClientMessage::ScreenShareStopped {
            slug: self.inner.room.clone(),
        })
        .await;
        self.inner.capture.stop().await;
        Ok(())
    }

    /// Returns whether the local user is presenting afterwards
    pub async fn toggle_presenting(&self) -> Result<bool> {
        if self.is_presenting().await {
            self.stop_presenting().await?;
            Ok(false)
        } else {
            self.start_presenting().await?;
            Ok(true)
        }
    }

    /// The capture source went away on its own (user ended the share)
    pub async fn capture_ended(&self) -> Result<()> {
        debug!("capture ended by provider");
        self.stop_presenting().await
    }

    pub fn remote_started(&self, peer: &PeerId) {
        if !self.inner.mesh.set_presenter(Presenter::Remote(peer.clone())) {
            debug!(%peer, "presentation announcement had no effect");
        }
    }

    /// Clears only if `peer` is still the presenter
    pub fn remote_stopped(&self, peer: &PeerId) {
        self.inner
            .mesh
            .clear_presenter_if(&Presenter::Remote(peer.clone()));
    }

    async fn announce(&self, msg: ClientMessage) {
        let event = msg.event();
        if let Err(e) = self.inner.relay.send(msg).await {
            warn!(event, error = %e, "presentation announcement failed");
        }
    }
}
