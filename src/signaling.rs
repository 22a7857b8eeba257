//! Signaling adapter: relay frames in, mesh operations and relay frames out
//!
//! One dispatch task reads the relay subscription and the transport callback
//! channel. Relay frames are routed to a worker per peer so that messages for
//! one peer run strictly in delivery order while different peers interleave
//! freely.

use crate::error::Result;
use crate::events::RemovalReason;
use crate::mesh::Mesh;
use crate::peer::types::{IceCandidate, PeerId, SessionDescription};
use crate::presentation::PresentationCoordinator;
use crate::relay::{ClientMessage, RelayLink, ServerMessage};
use crate::transport::{TransportEvent, TransportEventKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Work item for one peer's worker
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCommand {
    /// Listed in the roster: we are the initiator
    Initiate { name: String },
    Offer {
        sdp: SessionDescription,
        name: Option<String>,
    },
    Answer {
        sdp: SessionDescription,
        name: Option<String>,
    },
    Candidate(IceCandidate),
    Joined { name: String },
    Left,
    PresentingStarted,
    PresentingStopped,
}

/// Maps one inbound frame to per-peer commands
pub fn route(msg: ServerMessage) -> Vec<(PeerId, PeerCommand)> {
    match msg {
        ServerMessage::AllUsers(roster) => roster
            .into_iter()
            .map(|entry| {
                (
                    entry.socket_id,
                    PeerCommand::Initiate {
                        name: entry.user_name,
                    },
                )
            })
            .collect(),
        ServerMessage::Offer {
            sdp,
            caller,
            caller_name,
        } => vec![(caller, PeerCommand::Offer { sdp, name: caller_name })],
        ServerMessage::Answer {
            sdp,
            answerer,
            answerer_name,
        } => vec![(
            answerer,
            PeerCommand::Answer {
                sdp,
                name: answerer_name,
            },
        )],
        ServerMessage::IceCandidate { candidate, from } => {
            vec![(from, PeerCommand::Candidate(candidate))]
        }
        ServerMessage::UserJoined {
            socket_id,
            user_name,
        } => vec![(socket_id, PeerCommand::Joined { name: user_name })],
        ServerMessage::UserLeft { socket_id } => vec![(socket_id, PeerCommand::Left)],
        ServerMessage::ScreenShareStarted { socket_id } => {
            vec![(socket_id, PeerCommand::PresentingStarted)]
        }
        ServerMessage::ScreenShareStopped { socket_id } => {
            vec![(socket_id, PeerCommand::PresentingStopped)]
        }
    }
}

struct Worker {
    id: u64,
    tx: mpsc::UnboundedSender<PeerCommand>,
    handle: JoinHandle<()>,
}

struct Shared {
    mesh: Mesh,
    relay: Arc<dyn RelayLink>,
    presentation: PresentationCoordinator,
    active: AtomicBool,
    workers: Mutex<HashMap<PeerId, Worker>>,
    next_worker: AtomicU64,
}

impl Shared {
    /// Outbound frames stop once the adapter is shut down
    async fn emit(&self, msg: ClientMessage) {
        if !self.active.load(Ordering::Acquire) {
            trace!(event = msg.event(), "adapter inactive, dropping outbound frame");
            return;
        }
        let event = msg.event();
        if let Err(e) = self.relay.send(msg).await {
            warn!(event, error = %e, "relay send failed");
        }
    }

    fn record_name(&self, peer: &PeerId, name: Option<&str>) {
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            self.mesh.record_name(peer, name);
        }
    }

    async fn execute(&self, peer: &PeerId, cmd: PeerCommand) -> Result<()> {
        match cmd {
            PeerCommand::Initiate { name } => {
                self.record_name(peer, Some(&name));
                if let Some(offer) = self.mesh.create_offer(peer).await? {
                    self.emit(ClientMessage::Offer {
                        target: peer.clone(),
                        sdp: offer,
                    })
                    .await;
                }
            }
            PeerCommand::Offer { sdp, name } => {
                self.record_name(peer, name.as_deref());
                if let Some(answer) = self.mesh.accept_offer(peer, sdp).await? {
                    self.emit(ClientMessage::Answer {
                        target: peer.clone(),
                        sdp: answer,
                    })
                    .await;
                }
            }
            PeerCommand::Answer { sdp, name } => {
                self.record_name(peer, name.as_deref());
                self.mesh.accept_answer(peer, sdp).await?;
            }
            PeerCommand::Candidate(candidate) => {
                self.mesh.add_remote_candidate(peer, candidate).await;
            }
            PeerCommand::Joined { name } => {
                // the newcomer initiates; nothing to negotiate yet
                self.record_name(peer, Some(&name));
            }
            PeerCommand::Left => {
                self.mesh.remove_peer(peer, RemovalReason::Left).await;
            }
            PeerCommand::PresentingStarted => self.presentation.remote_started(peer),
            PeerCommand::PresentingStopped => self.presentation.remote_stopped(peer),
        }
        Ok(())
    }

    fn dispatch(self: &Arc<Self>, peer: PeerId, cmd: PeerCommand) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        // sending under the lock pairs with the emptiness check in `retire`
        let mut workers = self.workers.lock();

        let tx = match workers.get(&peer) {
            Some(worker) if !worker.tx.is_closed() => worker.tx.clone(),
            _ => {
                let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = tokio::spawn(run_worker(Arc::clone(self), peer.clone(), id, rx));
                workers.insert(
                    peer.clone(),
                    Worker {
                        id,
                        tx: tx.clone(),
                        handle,
                    },
                );
                tx
            }
        };
        let _ = tx.send(cmd);
    }

    /// Drops the worker after a departure unless more work is already queued.
    ///
    /// The departure has fully run by now, so a replacement worker for a
    /// rejoin cannot overtake it.
    fn retire(&self, peer: &PeerId, id: u64, rx: &mpsc::UnboundedReceiver<PeerCommand>) -> bool {
        let mut workers = self.workers.lock();
        if !rx.is_empty() {
            return false;
        }
        if workers.get(peer).is_some_and(|w| w.id == id) {
            workers.remove(peer);
        }
        true
    }

    async fn on_transport_event(&self, event: TransportEvent) {
        let TransportEvent {
            peer,
            generation,
            kind,
        } = event;
        match kind {
            TransportEventKind::LocalCandidate(candidate) => {
                if self.mesh.is_current(&peer, generation) {
                    self.emit(ClientMessage::IceCandidate {
                        target: peer,
                        candidate,
                    })
                    .await;
                }
            }
            TransportEventKind::RemoteStream(stream) => {
                self.mesh.on_remote_stream(&peer, generation, stream);
            }
            TransportEventKind::StateChanged(state) => {
                debug!(%peer, ?state, "transport state");
                if state.is_terminal() {
                    // closing a transport can take a while; relay routing keeps going
                    let mesh = self.mesh.clone();
                    tokio::spawn(async move {
                        mesh.on_transport_state(&peer, generation, state).await;
                    });
                }
            }
        }
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    peer: PeerId,
    id: u64,
    mut rx: mpsc::UnboundedReceiver<PeerCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        if !shared.active.load(Ordering::Acquire) {
            break;
        }
        let departed = matches!(cmd, PeerCommand::Left);
        if let Err(e) = shared.execute(&peer, cmd).await {
            if shared.active.load(Ordering::Acquire) {
                shared.mesh.report_failure(&peer, &e);
            }
        }
        if departed && shared.retire(&peer, id, &rx) {
            break;
        }
    }
    trace!(%peer, "peer worker finished");
}

async fn run_dispatch(
    shared: Arc<Shared>,
    mut inbound: broadcast::Receiver<ServerMessage>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    loop {
        tokio::select! {
            frame = inbound.recv() => match frame {
                Ok(msg) => {
                    debug!(event = msg.event(), peer = ?msg.peer_id(), "relay message");
                    for (peer, cmd) in route(msg) {
                        shared.dispatch(peer, cmd);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "relay subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("relay subscription closed");
                    break;
                }
            },
            Some(event) = transport_events.recv() => {
                shared.on_transport_event(event).await;
            }
        }
    }
}

/// Bridges one room's relay traffic to its mesh
pub struct SignalingAdapter {
    shared: Arc<Shared>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingAdapter {
    /// Subscribes to `relay` right away, so nothing sent after this call is missed
    pub fn start(
        mesh: Mesh,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        relay: Arc<dyn RelayLink>,
        presentation: PresentationCoordinator,
    ) -> Self {
        let inbound = relay.subscribe();
        let shared = Arc::new(Shared {
            mesh,
            relay,
            presentation,
            active: AtomicBool::new(true),
            workers: Mutex::new(HashMap::new()),
            next_worker: AtomicU64::new(0),
        });
        let dispatch = tokio::spawn(run_dispatch(Arc::clone(&shared), inbound, transport_events));
        Self {
            shared,
            dispatch: Mutex::new(Some(dispatch)),
        }
    }

    /// Sends the join announcement for `room`
    pub async fn announce(&self, room: &str, display_name: &str) -> Result<()> {
        info!(room, name = display_name, "joining room");
        self.shared
            .relay
            .send(ClientMessage::JoinRoom {
                slug: room.to_owned(),
                user_name: display_name.to_owned(),
            })
            .await
    }

    /// Feeds one frame as if it came from the relay
    pub fn handle(&self, msg: ServerMessage) {
        for (peer, cmd) in route(msg) {
            self.shared.dispatch(peer, cmd);
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn mesh(&self) -> &Mesh {
        &self.shared.mesh
    }

    /// Peers with a live worker
    pub fn worker_count(&self) -> usize {
        self.shared.workers.lock().len()
    }

    /// Stops emission, tears the mesh down, then lets in-flight work finish.
    ///
    /// Workers are not aborted: a step resuming after the teardown sees the
    /// mesh shut down and closes whatever it created. The relay stays open.
    pub async fn shutdown(&self) {
        if !self.shared.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.dispatch.lock().take() {
            handle.abort();
        }
        self.shared.mesh.teardown_all().await;

        let workers: Vec<Worker> = self.shared.workers.lock().drain().map(|(_, w)| w).collect();
        for Worker { tx, handle, .. } in workers {
            drop(tx);
            if let Err(e) = handle.await {
                warn!(error = %e, "peer worker ended abnormally");
            }
        }
        debug!("signaling adapter stopped");
    }
}

impl Drop for SignalingAdapter {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::Release);
        if let Some(handle) = self.dispatch.get_mut().take() {
            handle.abort();
        }
        // dropping the senders lets each worker finish its current step and exit
        self.shared.workers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeshError;
    use crate::media::{LocalMedia, LocalTrack, ScreenCapture};
    use crate::peer::state::{SignalingState, TransportState};
    use crate::relay::{LoopbackHub, LoopbackRelay, RosterEntry};
    use crate::transport::fake::{test_track, FakeTransportFactory};
    use async_trait::async_trait;
    use tokio::time::{sleep, timeout, Duration};

    struct NoScreen;

    #[async_trait]
    impl ScreenCapture for NoScreen {
        async fn start(&self) -> Result<LocalTrack> {
            Err(MeshError::Capture("no display".into()))
        }

        async fn stop(&self) {}
    }

    async fn started(hub: &LoopbackHub, factory: Arc<FakeTransportFactory>) -> (SignalingAdapter, Arc<LoopbackRelay>) {
        let relay = Arc::new(hub.link());
        relay.connect().await.unwrap();
        let media = LocalMedia::new(Some(test_track("mic", false)), Some(test_track("camera", true)));
        let (mesh, transport_events) = Mesh::new(factory, media);
        let presentation = PresentationCoordinator::new(
            mesh.clone(),
            relay.clone(),
            Arc::new(NoScreen),
            "r",
            None,
        );
        let adapter = SignalingAdapter::start(mesh, transport_events, relay.clone(), presentation);
        (adapter, relay)
    }

    async fn settle<F: FnMut() -> bool>(what: &str, mut condition: F) {
        let polled = timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(polled.is_ok(), "timed out waiting for {what}");
    }

    async fn send_offer(link: &LoopbackRelay, target: &PeerId) {
        link.send(ClientMessage::Offer {
            target: target.clone(),
            sdp: SessionDescription::offer("o"),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn departed_peers_do_not_keep_workers() {
        let hub = LoopbackHub::new();
        let (adapter, _relay) = started(&hub, Arc::new(FakeTransportFactory::new("me"))).await;

        for n in 0..200 {
            let peer = PeerId::new(format!("p{n}"));
            adapter.handle(ServerMessage::UserJoined {
                socket_id: peer.clone(),
                user_name: format!("P{n}"),
            });
            adapter.handle(ServerMessage::UserLeft { socket_id: peer });
        }

        settle("workers to retire", || adapter.worker_count() == 0).await;
        assert!(adapter.mesh().peers().is_empty());
        assert!(adapter.mesh().display_names().is_empty());
    }

    #[tokio::test]
    async fn rejoin_runs_after_the_departure() {
        let hub = LoopbackHub::new();
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let (adapter, _relay) = started(&hub, factory.clone()).await;
        let p = PeerId::from("p");
        let offer = || ServerMessage::Offer {
            sdp: SessionDescription::offer("offer-from-p"),
            caller: p.clone(),
            caller_name: Some("P".into()),
        };

        // queued behind the departure on the same worker
        adapter.handle(offer());
        adapter.handle(ServerMessage::UserLeft { socket_id: p.clone() });
        adapter.handle(offer());
        settle("second session", || factory.created_count(&p) == 2).await;
        settle("second session stable", || {
            adapter.mesh().signaling_state(&p) == Some(SignalingState::Stable)
        })
        .await;

        // after the worker retired, a fresh one picks up the rejoin
        adapter.handle(ServerMessage::UserLeft { socket_id: p.clone() });
        settle("worker to retire", || adapter.worker_count() == 0).await;
        adapter.handle(offer());
        settle("third session stable", || {
            factory.created_count(&p) == 3
                && adapter.mesh().signaling_state(&p) == Some(SignalingState::Stable)
        })
        .await;
        assert_eq!(adapter.mesh().display_name(&p).as_deref(), Some("P"));
    }

    #[tokio::test]
    async fn shutdown_during_session_creation_closes_the_transport() {
        let hub = LoopbackHub::new();
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let gate = factory.hold_track_attachment();
        let (adapter, _relay) = started(&hub, factory.clone()).await;
        let a = PeerId::from("a");

        adapter.handle(ServerMessage::AllUsers(vec![RosterEntry {
            socket_id: a.clone(),
            user_name: "Ann".into(),
        }]));
        settle("transport to be created", || factory.created_count(&a) == 1).await;

        let mesh = adapter.mesh().clone();
        let release = async {
            settle("teardown to start", || mesh.is_shut_down()).await;
            gate.close();
        };
        tokio::join!(adapter.shutdown(), release);

        assert!(mesh.peers().is_empty());
        assert_eq!(factory.created_count(&a), 1);
        assert!(factory.transport(&a).unwrap().is_closed());
        assert_eq!(adapter.worker_count(), 0);
    }

    #[tokio::test]
    async fn slow_close_does_not_stall_relay_frames() {
        let hub = LoopbackHub::new();
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let gate = factory.hold_close();
        let (adapter, relay) = started(&hub, factory.clone()).await;
        let me = relay.id().unwrap();

        let first = hub.link();
        first.connect().await.unwrap();
        let first_id = first.id().unwrap();
        send_offer(&first, &me).await;
        settle("first session", || {
            adapter.mesh().signaling_state(&first_id) == Some(SignalingState::Stable)
        })
        .await;

        factory
            .transport(&first_id)
            .unwrap()
            .report_state(TransportState::Failed);
        settle("first peer dropped", || !adapter.mesh().contains(&first_id)).await;
        assert!(!factory.transport(&first_id).unwrap().is_closed());

        let second = hub.link();
        second.connect().await.unwrap();
        let second_id = second.id().unwrap();
        send_offer(&second, &me).await;
        settle("second session while the first still closes", || {
            adapter.mesh().signaling_state(&second_id) == Some(SignalingState::Stable)
        })
        .await;

        gate.close();
        settle("first transport closed", || {
            factory.transport(&first_id).unwrap().is_closed()
        })
        .await;
    }

    #[test]
    fn roster_becomes_one_initiation_per_peer() {
        let routed = route(ServerMessage::AllUsers(vec![
            RosterEntry {
                socket_id: "a".into(),
                user_name: "Ann".into(),
            },
            RosterEntry {
                socket_id: "b".into(),
                user_name: "Bob".into(),
            },
        ]));
        assert_eq!(
            routed,
            vec![
                (PeerId::from("a"), PeerCommand::Initiate { name: "Ann".into() }),
                (PeerId::from("b"), PeerCommand::Initiate { name: "Bob".into() }),
            ]
        );
    }

    #[test]
    fn every_frame_maps_to_exactly_one_handler() {
        let frames = vec![
            ServerMessage::Offer {
                sdp: SessionDescription::offer("o"),
                caller: "p".into(),
                caller_name: None,
            },
            ServerMessage::Answer {
                sdp: SessionDescription::answer("a"),
                answerer: "p".into(),
                answerer_name: Some("P".into()),
            },
            ServerMessage::IceCandidate {
                candidate: IceCandidate::new("c"),
                from: "p".into(),
            },
            ServerMessage::UserJoined {
                socket_id: "p".into(),
                user_name: "P".into(),
            },
            ServerMessage::UserLeft {
                socket_id: "p".into(),
            },
            ServerMessage::ScreenShareStarted {
                socket_id: "p".into(),
            },
            ServerMessage::ScreenShareStopped {
                socket_id: "p".into(),
            },
        ];
        for frame in frames {
            let routed = route(frame.clone());
            assert_eq!(routed.len(), 1, "{}", frame.event());
            assert_eq!(Some(&routed[0].0), frame.peer_id());
        }
    }

    #[test]
    fn empty_roster_routes_nothing() {
        assert!(route(ServerMessage::AllUsers(Vec::new())).is_empty());
    }
}
