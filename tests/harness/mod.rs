//! Test helpers for multi-client mesh tests
//!
//! Wires several clients through one in-process loopback hub, each with its
//! own scriptable fake transport factory.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tiptip_mesh::transport::fake::{test_track, FakeTransport, FakeTransportFactory};
use tiptip_mesh::{
    LocalMedia, LocalTrack, LoopbackHub, LoopbackRelay, Mesh, PeerId, RelayLink, RoomSession,
    ScreenCapture,
};
use tokio::time::{sleep, timeout, Duration};

/// Local candidates every fake transport gathers
pub const LOCAL_CANDIDATES: usize = 3;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Capture source that always succeeds
#[derive(Default)]
pub struct FakeScreen {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

#[async_trait]
impl ScreenCapture for FakeScreen {
    async fn start(&self) -> tiptip_mesh::Result<LocalTrack> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(test_track("screen", true))
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Client {
    pub id: PeerId,
    pub name: String,
    pub relay: Arc<LoopbackRelay>,
    pub factory: Arc<FakeTransportFactory>,
    pub screen: Arc<FakeScreen>,
    pub session: RoomSession,
    pub mesh: Mesh,
}

impl Client {
    /// Fake transport this client holds towards `peer`
    pub fn transport_to(&self, peer: &Client) -> Arc<FakeTransport> {
        self.factory
            .transport(&peer.id)
            .unwrap_or_else(|| panic!("{} has no transport to {}", self.name, peer.name))
    }
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn camera_media() -> LocalMedia {
    LocalMedia::new(
        Some(test_track("mic", false)),
        Some(test_track("camera", true)),
    )
}

/// Connected relay link plus a factory labelled with the hub-assigned id
pub async fn connect(hub: &LoopbackHub) -> (Arc<LoopbackRelay>, PeerId, Arc<FakeTransportFactory>) {
    let relay = Arc::new(hub.link());
    relay.connect().await.expect("loopback connect");
    let id = relay.id().expect("connected link has an id");
    let factory = Arc::new(FakeTransportFactory::new(id.clone()).with_local_candidates(LOCAL_CANDIDATES));
    (relay, id, factory)
}

/// Joins with a factory prepared by [`connect`]
pub async fn join_with(
    relay: Arc<LoopbackRelay>,
    id: PeerId,
    factory: Arc<FakeTransportFactory>,
    room: &str,
    name: &str,
) -> Client {
    let screen = Arc::new(FakeScreen::default());
    let session = RoomSession::new(relay.clone(), factory.clone(), screen.clone());
    let mesh = session
        .join(room, name, camera_media())
        .await
        .expect("join room");
    Client {
        id,
        name: name.to_owned(),
        relay,
        factory,
        screen,
        session,
        mesh,
    }
}

pub async fn join(hub: &LoopbackHub, room: &str, name: &str) -> Client {
    let (relay, id, factory) = connect(hub).await;
    join_with(relay, id, factory, room, name).await
}

/// Polls `condition` until it holds, failing the test after a few seconds
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let polled = timeout(WAIT_LIMIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

/// Waits until every pair of `clients` has a stable session with its remote stream
pub async fn wait_fully_connected(clients: &[&Client]) {
    for a in clients {
        for b in clients {
            if a.id == b.id {
                continue;
            }
            let what = format!("{} to reach {}", a.name, b.name);
            wait_until(&what, || {
                a.mesh
                    .snapshot(&b.id)
                    .is_some_and(|s| s.signaling.is_stable() && s.has_remote_stream)
            })
            .await;
        }
    }
}
