//! Room join controller
//!
//! Starts one mesh per room once local media is ready and guarantees the mesh
//! is torn down exactly once. The relay link is injected and outlives rooms.

use crate::error::{MeshError, Result};
use crate::media::{LocalMedia, ScreenCapture};
use crate::mesh::Mesh;
use crate::presentation::PresentationCoordinator;
use crate::relay::RelayLink;
use crate::signaling::SignalingAdapter;
use crate::transport::TransportFactory;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

struct ActiveRoom {
    room: String,
    display_name: String,
    mesh: Mesh,
    adapter: SignalingAdapter,
    presentation: PresentationCoordinator,
}

pub struct RoomSession {
    relay: Arc<dyn RelayLink>,
    factory: Arc<dyn TransportFactory>,
    capture: Arc<dyn ScreenCapture>,
    active: Mutex<Option<ActiveRoom>>,
}

impl RoomSession {
    pub fn new(
        relay: Arc<dyn RelayLink>,
        factory: Arc<dyn TransportFactory>,
        capture: Arc<dyn ScreenCapture>,
    ) -> Self {
        Self {
            relay,
            factory,
            capture,
            active: Mutex::new(None),
        }
    }

    /// Joins `room`, leaving the current room first if there is one.
    ///
    /// Fails without touching the relay when the name is blank or `media` has
    /// no tracks.
    pub async fn join(&self, room: &str, display_name: &str, media: LocalMedia) -> Result<Mesh> {
        let room = room.trim();
        if room.is_empty() {
            return Err(MeshError::InvalidConfig("room id cannot be empty".into()));
        }
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(MeshError::EmptyDisplayName);
        }
        if media.is_empty() {
            return Err(MeshError::NoLocalMedia);
        }

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(from = %previous.room, to = room, "switching rooms");
            shutdown(previous).await;
        }

        if !self.relay.is_connected() {
            self.relay.connect().await?;
        }

        let camera = media.video().cloned();
        let (mesh, transport_events) = Mesh::new(Arc::clone(&self.factory), media);
        let presentation = PresentationCoordinator::new(
            mesh.clone(),
            Arc::clone(&self.relay),
            Arc::clone(&self.capture),
            room,
            camera,
        );
        let adapter = SignalingAdapter::start(
            mesh.clone(),
            transport_events,
            Arc::clone(&self.relay),
            presentation.clone(),
        );

        if let Err(e) = adapter.announce(room, display_name).await {
            adapter.shutdown().await;
            return Err(e);
        }

        *active = Some(ActiveRoom {
            room: room.to_owned(),
            display_name: display_name.to_owned(),
            mesh: mesh.clone(),
            adapter,
            presentation,
        });
        Ok(mesh)
    }

    /// Leaves the current room. Returns `false` if there was nothing to leave.
    pub async fn leave(&self) -> bool {
        match self.active.lock().await.take() {
            Some(room) => {
                shutdown(room).await;
                true
            }
            None => false,
        }
    }

    pub async fn is_joined(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn room(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|r| r.room.clone())
    }

    pub async fn display_name(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|r| r.display_name.clone())
    }

    pub async fn mesh(&self) -> Option<Mesh> {
        self.active.lock().await.as_ref().map(|r| r.mesh.clone())
    }

    pub async fn presentation(&self) -> Option<PresentationCoordinator> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|r| r.presentation.clone())
    }

    pub fn relay(&self) -> &Arc<dyn RelayLink> {
        &self.relay
    }
}

async fn shutdown(room: ActiveRoom) {
    if let Err(e) = room.presentation.stop_presenting().await {
        warn!(error = %e, "failed to stop presenting on leave");
    }
    room.adapter.shutdown().await;
    info!(room = %room.room, "left room");
}
