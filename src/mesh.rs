//! Mesh registry: the single owner of every peer session
//!
//! Other components address sessions by [`PeerId`] only. Every async step
//! re-checks the session generation after it resumes, so a peer removed (or a
//! mesh torn down) mid-negotiation is never touched again.

use crate::error::{MeshError, Result};
use crate::events::{EventBus, MeshEvent, RemovalReason};
use crate::media::{LocalMedia, LocalTrack, RemoteStream};
use crate::peer::connection::{PeerSession, PeerSnapshot};
use crate::peer::ice::{apply_pending_candidates, CandidateQueue};
use crate::peer::state::{SignalingEvent, SignalingState, TransportState};
use crate::peer::types::{IceCandidate, PeerId, Presenter, SessionDescription};
use crate::transport::{Transport, TransportEvent, TransportEvents, TransportFactory};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Default)]
struct MeshState {
    sessions: HashMap<PeerId, PeerSession>,
    names: HashMap<PeerId, String>,
    orphans: HashMap<PeerId, CandidateQueue>,
    outgoing: LocalMedia,
    presenter: Presenter,
    shut_down: bool,
}

struct MeshInner {
    factory: Arc<dyn TransportFactory>,
    state: Mutex<MeshState>,
    presenter_tx: watch::Sender<Presenter>,
    events: EventBus,
    callbacks: mpsc::UnboundedSender<TransportEvent>,
    next_generation: AtomicU64,
}

/// Cheap handle to the registry; clones share state
#[derive(Clone)]
pub struct Mesh {
    inner: Arc<MeshInner>,
}

impl Mesh {
    /// Creates an empty mesh sending `media` to every future session.
    ///
    /// The receiver yields the transports' asynchronous callbacks.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        media: LocalMedia,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (callbacks, rx) = mpsc::unbounded_channel();
        let (presenter_tx, _) = watch::channel(Presenter::Nobody);
        let state = MeshState {
            outgoing: media,
            ..Default::default()
        };
        let mesh = Self {
            inner: Arc::new(MeshInner {
                factory,
                state: Mutex::new(state),
                presenter_tx,
                events: EventBus::new(),
                callbacks,
                next_generation: AtomicU64::new(1),
            }),
        };
        (mesh, rx)
    }

    // ========== OBSERVERS ==========

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.inner.events.subscribe()
    }

    pub fn watch_presenter(&self) -> watch::Receiver<Presenter> {
        self.inner.presenter_tx.subscribe()
    }

    pub fn presenter(&self) -> Presenter {
        self.inner.state.lock().presenter.clone()
    }

    /// Known peers, sorted
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.inner.state.lock().sessions.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.inner.state.lock().sessions.contains_key(peer)
    }

    pub fn snapshot(&self, peer: &PeerId) -> Option<PeerSnapshot> {
        self.inner
            .state
            .lock()
            .sessions
            .get(peer)
            .map(PeerSnapshot::from)
    }

    pub fn signaling_state(&self, peer: &PeerId) -> Option<SignalingState> {
        self.inner
            .state
            .lock()
            .sessions
            .get(peer)
            .map(PeerSession::signaling_state)
    }

    pub fn display_name(&self, peer: &PeerId) -> Option<String> {
        self.inner.state.lock().names.get(peer).cloned()
    }

    pub fn display_names(&self) -> HashMap<PeerId, String> {
        self.inner.state.lock().names.clone()
    }

    pub fn remote_streams(&self) -> HashMap<PeerId, RemoteStream> {
        self.inner
            .state
            .lock()
            .sessions
            .iter()
            .filter_map(|(id, s)| s.remote_stream().map(|st| (id.clone(), st.clone())))
            .collect()
    }

    /// Tracks currently sent to every session
    pub fn outgoing_media(&self) -> LocalMedia {
        self.inner.state.lock().outgoing.clone()
    }

    /// Candidates held for a peer that has no session yet
    pub fn orphan_candidates(&self, peer: &PeerId) -> usize {
        self.inner
            .state
            .lock()
            .orphans
            .get(peer)
            .map_or(0, CandidateQueue::len)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }

    /// True while `generation` is still the live session for `peer`
    pub fn is_current(&self, peer: &PeerId, generation: u64) -> bool {
        self.inner
            .state
            .lock()
            .sessions
            .get(peer)
            .is_some_and(|s| s.generation() == generation)
    }

    // ========== MEMBERSHIP ==========

    /// Names may arrive before or after the session; an unchanged name emits nothing
    pub fn record_name(&self, peer: &PeerId, name: &str) {
        let changed = {
            let mut st = self.inner.state.lock();
            if st.shut_down {
                return;
            }
            st.names.insert(peer.clone(), name.to_owned()).as_deref() != Some(name)
        };
        if changed {
            self.inner.events.emit(MeshEvent::NameUpdated {
                peer: peer.clone(),
                name: name.to_owned(),
            });
        }
    }

    /// Get-or-create. A new session gets every outgoing track attached.
    ///
    /// Returns the session generation.
    pub async fn ensure_session(&self, peer: &PeerId) -> Result<u64> {
        let tracks = {
            let st = self.inner.state.lock();
            if st.shut_down {
                return Err(MeshError::NotJoined);
            }
            if let Some(existing) = st.sessions.get(peer) {
                return Ok(existing.generation());
            }
            st.outgoing.tracks()
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let events = TransportEvents::new(peer.clone(), generation, self.inner.callbacks.clone());
        let transport = self.inner.factory.create(peer, events).await?;

        let attached_video = tracks.iter().find(|t| crate::media::is_video(t)).cloned();
        for track in tracks {
            if let Err(e) = transport.add_track(track).await {
                warn!(%peer, error = %e, "failed to attach local track");
                close_quietly(peer, transport.as_ref()).await;
                return Err(e);
            }
        }

        enum Outcome {
            Inserted(Option<LocalTrack>),
            Existing(u64),
            ShutDown,
        }

        let outcome = {
            let mut st = self.inner.state.lock();
            if st.shut_down {
                Outcome::ShutDown
            } else if let Some(existing) = st.sessions.get(peer) {
                Outcome::Existing(existing.generation())
            } else {
                let mut session = PeerSession::new(peer.clone(), generation, Arc::clone(&transport));
                if let Some(orphans) = st.orphans.remove(peer) {
                    debug!(%peer, count = orphans.len(), "adopting early candidates");
                    session.adopt_candidates(orphans);
                }
                st.sessions.insert(peer.clone(), session);

                // a swap may have happened while the tracks were being attached
                let current = st.outgoing.video().cloned();
                let stale = match (&current, &attached_video) {
                    (Some(c), Some(a)) => !Arc::ptr_eq(c, a),
                    _ => false,
                };
                Outcome::Inserted(if stale { current } else { None })
            }
        };

        match outcome {
            Outcome::Inserted(resync) => {
                info!(%peer, generation, "session created");
                self.inner.events.emit(MeshEvent::SessionCreated { peer: peer.clone() });
                if let Some(track) = resync {
                    if let Err(e) = transport.replace_video_track(Some(track)).await {
                        warn!(%peer, error = %e, "failed to resync outgoing video");
                    }
                }
                Ok(generation)
            }
            Outcome::Existing(existing) => {
                debug!(%peer, "session appeared concurrently, discarding duplicate transport");
                close_quietly(peer, transport.as_ref()).await;
                Ok(existing)
            }
            Outcome::ShutDown => {
                close_quietly(peer, transport.as_ref()).await;
                Err(MeshError::NotJoined)
            }
        }
    }

    /// Closes and forgets everything about `peer`. Absent peers are a no-op.
    pub async fn remove_peer(&self, peer: &PeerId, reason: RemovalReason) -> bool {
        self.remove(peer, None, reason).await
    }

    /// With `generation` set, only that exact session is removed
    async fn remove(&self, peer: &PeerId, generation: Option<u64>, reason: RemovalReason) -> bool {
        let (session, had_name, presenter) = {
            let mut st = self.inner.state.lock();
            if let Some(generation) = generation {
                if !st.sessions.get(peer).is_some_and(|s| s.generation() == generation) {
                    return false;
                }
            }
            let session = st.sessions.remove(peer);
            st.orphans.remove(peer);
            let had_name = st.names.remove(peer).is_some();
            let presenter = if st.presenter.is_remote(peer) {
                st.presenter = Presenter::Nobody;
                Some(Presenter::Nobody)
            } else {
                None
            };
            (session, had_name, presenter)
        };

        if let Some(p) = presenter {
            self.publish_presenter(p);
        }

        let existed = session.is_some() || had_name;
        if let Some(mut session) = session {
            let _ = session.advance(SignalingEvent::Close);
            close_quietly(peer, session.transport().as_ref()).await;
            info!(%peer, ?reason, "peer removed");
        }
        if existed {
            self.inner.events.emit(MeshEvent::PeerRemoved {
                peer: peer.clone(),
                reason,
            });
        }
        existed
    }

    /// Removes every peer and refuses new sessions afterwards
    pub async fn teardown_all(&self) {
        let peers: Vec<PeerId> = {
            let mut st = self.inner.state.lock();
            st.shut_down = true;
            st.orphans.clear();
            let mut peers: Vec<_> = st.sessions.keys().cloned().collect();
            peers.extend(st.names.keys().filter(|p| !st.sessions.contains_key(*p)).cloned());
            peers
        };
        for peer in peers {
            self.remove_peer(&peer, RemovalReason::Teardown).await;
        }
        self.set_presenter(Presenter::Nobody);
        debug!("mesh torn down");
    }

    // ========== NEGOTIATION ==========

    /// Initiator path. `None` means the session went away mid-way.
    pub async fn create_offer(&self, peer: &PeerId) -> Result<Option<SessionDescription>> {
        let generation = self.ensure_session(peer).await?;
        let Some(transport) = self.checked_transport(peer, generation, SignalingEvent::SetLocalOffer)? else {
            return Ok(None);
        };

        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        if !self.advance(peer, generation, SignalingEvent::SetLocalOffer)? {
            return Ok(None);
        }
        debug!(%peer, "offer ready");
        Ok(Some(offer))
    }

    /// Responder path. Returns the answer to send back.
    pub async fn accept_offer(
        &self,
        peer: &PeerId,
        offer: SessionDescription,
    ) -> Result<Option<SessionDescription>> {
        let generation = self.ensure_session(peer).await?;
        let Some(transport) = self.checked_transport(peer, generation, SignalingEvent::SetRemoteOffer)? else {
            return Ok(None);
        };

        transport.set_remote_description(offer).await?;
        if !self.advance(peer, generation, SignalingEvent::SetRemoteOffer)? {
            return Ok(None);
        }
        self.drain_if_ready(peer).await;

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        if !self.advance(peer, generation, SignalingEvent::SetLocalAnswer)? {
            return Ok(None);
        }
        self.inner.events.emit(MeshEvent::SessionStable { peer: peer.clone() });
        Ok(Some(answer))
    }

    /// Applies an answer to the matching initiator session
    pub async fn accept_answer(&self, peer: &PeerId, answer: SessionDescription) -> Result<bool> {
        let generation = {
            let st = self.inner.state.lock();
            st.sessions
                .get(peer)
                .map(PeerSession::generation)
                .ok_or_else(|| MeshError::UnknownPeer(peer.clone()))?
        };
        let Some(transport) = self.checked_transport(peer, generation, SignalingEvent::SetRemoteAnswer)? else {
            return Ok(false);
        };

        transport.set_remote_description(answer).await?;
        if !self.advance(peer, generation, SignalingEvent::SetRemoteAnswer)? {
            return Ok(false);
        }
        self.drain_if_ready(peer).await;
        self.inner.events.emit(MeshEvent::SessionStable { peer: peer.clone() });
        Ok(true)
    }

    /// Enqueue then attempt a drain. Candidates for unknown peers wait for the session.
    pub async fn add_remote_candidate(&self, peer: &PeerId, candidate: IceCandidate) -> usize {
        {
            let mut st = self.inner.state.lock();
            if st.shut_down {
                return 0;
            }
            match st.sessions.get_mut(peer) {
                Some(session) => session.enqueue_candidate(candidate),
                None => {
                    debug!(%peer, "candidate before session, holding");
                    st.orphans.entry(peer.clone()).or_default().enqueue(candidate);
                    return 0;
                }
            }
        }
        self.drain_if_ready(peer).await
    }

    /// Applies queued candidates in FIFO order once the remote description is set
    pub async fn drain_if_ready(&self, peer: &PeerId) -> usize {
        let ready = {
            let mut st = self.inner.state.lock();
            st.sessions
                .get_mut(peer)
                .and_then(|s| s.drain_if_ready().map(|batch| (s.transport(), batch)))
        };
        match ready {
            Some((transport, batch)) if !batch.is_empty() => {
                apply_pending_candidates(transport.as_ref(), peer, batch).await
            }
            _ => 0,
        }
    }

    /// Logs a per-peer negotiation failure; no other session is touched
    pub fn report_failure(&self, peer: &PeerId, err: &MeshError) {
        warn!(%peer, error = %err, "negotiation failed");
        self.inner.events.emit(MeshEvent::NegotiationFailed {
            peer: peer.clone(),
            message: err.to_string(),
        });
    }

    fn checked_transport(
        &self,
        peer: &PeerId,
        generation: u64,
        event: SignalingEvent,
    ) -> Result<Option<Arc<dyn Transport>>> {
        let st = self.inner.state.lock();
        match st.sessions.get(peer) {
            Some(s) if s.generation() == generation => {
                s.check(event)?;
                Ok(Some(s.transport()))
            }
            _ => Ok(None),
        }
    }

    /// `Ok(false)` when the session is gone or replaced
    fn advance(&self, peer: &PeerId, generation: u64, event: SignalingEvent) -> Result<bool> {
        let mut st = self.inner.state.lock();
        match st.sessions.get_mut(peer) {
            Some(s) if s.generation() == generation => {
                let next = s.advance(event)?;
                debug!(%peer, ?event, state = ?next, "signaling transition");
                Ok(true)
            }
            _ => {
                debug!(%peer, ?event, "session gone before transition");
                Ok(false)
            }
        }
    }

    // ========== TRANSPORT CALLBACKS ==========

    pub fn on_remote_stream(&self, peer: &PeerId, generation: u64, stream: RemoteStream) {
        let merged = {
            let mut st = self.inner.state.lock();
            match st.sessions.get_mut(peer) {
                Some(s) if s.generation() == generation => s.record_remote_stream(stream),
                _ => return,
            }
        };
        self.inner.events.emit(MeshEvent::RemoteStream {
            peer: peer.clone(),
            stream: merged,
        });
    }

    /// Disconnected or failed transports count as a departure
    pub async fn on_transport_state(&self, peer: &PeerId, generation: u64, state: TransportState) -> bool {
        if !state.is_terminal() {
            return false;
        }
        let removed = self
            .remove(peer, Some(generation), RemovalReason::ConnectionLost(state))
            .await;
        if removed {
            warn!(%peer, ?state, "transport lost, dropped peer");
        }
        removed
    }

    // ========== PRESENTATION ==========

    /// Sets the presenter. A remote presenter must have a live session.
    pub fn set_presenter(&self, presenter: Presenter) -> bool {
        let changed = {
            let mut st = self.inner.state.lock();
            if let Presenter::Remote(peer) = &presenter {
                if !st.sessions.contains_key(peer) {
                    debug!(%peer, "ignoring presenter without session");
                    return false;
                }
            }
            if st.presenter == presenter {
                false
            } else {
                st.presenter = presenter.clone();
                true
            }
        };
        if changed {
            self.publish_presenter(presenter);
        }
        changed
    }

    /// Clears the presenter only if it is still `expected`
    pub fn clear_presenter_if(&self, expected: &Presenter) -> bool {
        let cleared = {
            let mut st = self.inner.state.lock();
            if &st.presenter == expected && *expected != Presenter::Nobody {
                st.presenter = Presenter::Nobody;
                true
            } else {
                false
            }
        };
        if cleared {
            self.publish_presenter(Presenter::Nobody);
        }
        cleared
    }

    fn publish_presenter(&self, presenter: Presenter) {
        self.inner.presenter_tx.send_replace(presenter.clone());
        self.inner.events.emit(MeshEvent::PresenterChanged(presenter));
    }

    /// Swaps the outgoing video on every session. Failures stay per peer.
    ///
    /// Returns how many senders were replaced.
    pub async fn replace_outgoing_video(&self, track: Option<LocalTrack>) -> usize {
        let targets: Vec<(PeerId, Arc<dyn Transport>)> = {
            let mut st = self.inner.state.lock();
            st.outgoing.set_video(track.clone());
            st.sessions
                .iter()
                .map(|(id, s)| (id.clone(), s.transport()))
                .collect()
        };

        let mut replaced = 0;
        for (peer, transport) in targets {
            match transport.replace_video_track(track.clone()).await {
                Ok(true) => replaced += 1,
                Ok(false) => debug!(%peer, "session has no video sender"),
                Err(e) => warn!(%peer, error = %e, "failed to replace video track"),
            }
        }
        replaced
    }
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        let mut peers: Vec<_> = st.sessions.keys().collect();
        peers.sort();
        f.debug_struct("Mesh")
            .field("peers", &peers)
            .field("presenter", &st.presenter)
            .field("shut_down", &st.shut_down)
            .finish()
    }
}

async fn close_quietly(peer: &PeerId, transport: &dyn Transport) {
    if let Err(e) = transport.close().await {
        debug!(%peer, error = %e, "transport close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::{test_track, FakeTransportFactory};

    fn mesh_with(factory: Arc<FakeTransportFactory>) -> Mesh {
        let media = LocalMedia::new(
            Some(test_track("mic", false)),
            Some(test_track("camera", true)),
        );
        Mesh::new(factory, media).0
    }

    fn cand(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 1 10.1.1.{n} 4000 typ host"))
    }

    #[tokio::test]
    async fn ensure_session_is_get_or_create() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");

        let g1 = mesh.ensure_session(&a).await.unwrap();
        let g2 = mesh.ensure_session(&a).await.unwrap();

        assert_eq!(g1, g2);
        assert_eq!(mesh.peers(), vec![a.clone()]);
        assert_eq!(factory.created_count(&a), 1);
        let transport = factory.transport(&a).unwrap();
        assert_eq!(transport.track_ids(), vec!["mic", "camera"]);
    }

    #[tokio::test]
    async fn concurrent_creation_keeps_one_session() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");

        let (r1, r2) = tokio::join!(mesh.ensure_session(&a), mesh.ensure_session(&a));
        assert_eq!(r1.unwrap(), r2.unwrap());
        assert_eq!(mesh.peers().len(), 1);
    }

    #[tokio::test]
    async fn candidates_wait_for_answer_then_apply_in_order() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");

        mesh.create_offer(&a).await.unwrap().unwrap();
        for n in [3, 1, 2] {
            assert_eq!(mesh.add_remote_candidate(&a, cand(n)).await, 0);
        }
        let transport = factory.transport(&a).unwrap();
        assert!(transport.applied_candidates().is_empty());
        assert_eq!(mesh.snapshot(&a).unwrap().pending_candidates, 3);

        assert!(mesh
            .accept_answer(&a, SessionDescription::answer("answer-from-a"))
            .await
            .unwrap());

        assert_eq!(transport.applied_candidates(), vec![cand(3), cand(1), cand(2)]);
        let snap = mesh.snapshot(&a).unwrap();
        assert_eq!(snap.pending_candidates, 0);
        assert_eq!(snap.signaling, SignalingState::Stable);
    }

    #[tokio::test]
    async fn early_candidates_are_adopted_by_new_session() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");

        mesh.add_remote_candidate(&a, cand(1)).await;
        mesh.add_remote_candidate(&a, cand(2)).await;
        assert!(!mesh.contains(&a));
        assert_eq!(mesh.orphan_candidates(&a), 2);

        let answer = mesh
            .accept_offer(&a, SessionDescription::offer("offer-from-a"))
            .await
            .unwrap();
        assert!(answer.is_some());
        assert_eq!(
            factory.transport(&a).unwrap().applied_candidates(),
            vec![cand(1), cand(2)]
        );
        assert_eq!(mesh.orphan_candidates(&a), 0);
    }

    #[tokio::test]
    async fn second_offer_reuses_session() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");

        mesh.accept_offer(&a, SessionDescription::offer("o1")).await.unwrap();
        mesh.accept_offer(&a, SessionDescription::offer("o2")).await.unwrap();

        assert_eq!(factory.created_count(&a), 1);
        assert_eq!(mesh.signaling_state(&a), Some(SignalingState::Stable));
    }

    #[tokio::test]
    async fn answer_for_unknown_peer_is_an_error() {
        let mesh = mesh_with(Arc::new(FakeTransportFactory::new("me")));
        let err = mesh
            .accept_answer(&PeerId::from("ghost"), SessionDescription::answer("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn removal_is_idempotent_and_prunes_everything() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");

        mesh.record_name(&a, "Alice");
        mesh.ensure_session(&a).await.unwrap();
        assert!(mesh.set_presenter(Presenter::Remote(a.clone())));

        assert!(mesh.remove_peer(&a, RemovalReason::Left).await);
        assert!(!mesh.remove_peer(&a, RemovalReason::Left).await);

        assert!(mesh.peers().is_empty());
        assert_eq!(mesh.display_name(&a), None);
        assert_eq!(mesh.presenter(), Presenter::Nobody);
        assert_eq!(*mesh.watch_presenter().borrow(), Presenter::Nobody);
        assert!(factory.transport(&a).unwrap().is_closed());
    }

    #[tokio::test]
    async fn teardown_of_unstarted_mesh_is_harmless() {
        let mesh = mesh_with(Arc::new(FakeTransportFactory::new("me")));
        mesh.teardown_all().await;
        mesh.teardown_all().await;
        assert!(mesh.peers().is_empty());
        assert!(mesh.is_shut_down());
        assert!(matches!(
            mesh.ensure_session(&PeerId::from("a")).await,
            Err(MeshError::NotJoined)
        ));
    }

    #[tokio::test]
    async fn remote_presenter_requires_a_session() {
        let mesh = mesh_with(Arc::new(FakeTransportFactory::new("me")));
        assert!(!mesh.set_presenter(Presenter::Remote(PeerId::from("ghost"))));
        assert_eq!(mesh.presenter(), Presenter::Nobody);
    }

    #[tokio::test]
    async fn failure_on_one_peer_leaves_others_alone() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        factory.fail_negotiation_with("a");
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");
        let b = PeerId::from("b");

        mesh.record_name(&b, "Bob");
        mesh.add_remote_candidate(&b, cand(9)).await;
        mesh.ensure_session(&b).await.unwrap();
        let before = mesh.snapshot(&b).unwrap();

        let err = mesh
            .accept_offer(&a, SessionDescription::offer("offer-from-a"))
            .await
            .unwrap_err();
        mesh.report_failure(&a, &err);

        assert_eq!(mesh.signaling_state(&a), Some(SignalingState::New));
        assert_eq!(mesh.snapshot(&b).unwrap(), before);
        assert_eq!(mesh.display_name(&b).as_deref(), Some("Bob"));
    }

    #[tokio::test]
    async fn terminal_transport_state_removes_only_current_generation() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");
        let generation = mesh.ensure_session(&a).await.unwrap();

        mesh.on_transport_state(&a, generation + 100, TransportState::Failed)
            .await;
        assert!(mesh.contains(&a));

        mesh.on_transport_state(&a, generation, TransportState::Checking)
            .await;
        assert!(mesh.contains(&a));

        mesh.on_transport_state(&a, generation, TransportState::Disconnected)
            .await;
        assert!(!mesh.contains(&a));
    }

    #[tokio::test]
    async fn teardown_during_negotiation_leaves_nothing_behind() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");

        let teardown = async {
            tokio::task::yield_now().await;
            mesh.teardown_all().await;
        };
        let (offer, ()) = tokio::join!(mesh.create_offer(&a), teardown);

        // any outcome is fine as long as nothing survives
        let _ = offer;
        assert!(mesh.peers().is_empty());
        assert_eq!(factory.created_count(&a), 1);
        assert!(factory.transport(&a).unwrap().is_closed());
    }

    #[tokio::test]
    async fn teardown_while_tracks_attach_closes_the_new_transport() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let gate = factory.hold_track_attachment();
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");

        let creating = tokio::spawn({
            let mesh = mesh.clone();
            let a = a.clone();
            async move { mesh.ensure_session(&a).await }
        });
        while factory.created_count(&a) == 0 {
            tokio::task::yield_now().await;
        }

        mesh.teardown_all().await;
        gate.close();

        let result = creating.await.unwrap();
        assert!(matches!(result, Err(MeshError::NotJoined)));
        assert!(mesh.peers().is_empty());
        assert!(factory.transport(&a).unwrap().is_closed());
    }

    #[tokio::test]
    async fn failed_answer_does_not_block_the_next_offer() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");
        mesh.ensure_session(&a).await.unwrap();
        factory.transport(&a).unwrap().fail_next_answers(1);

        let err = mesh
            .accept_offer(&a, SessionDescription::offer("o1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Transport(_)));
        assert_eq!(mesh.signaling_state(&a), Some(SignalingState::HaveRemoteOffer));

        let answer = mesh
            .accept_offer(&a, SessionDescription::offer("o2"))
            .await
            .unwrap();
        assert_eq!(answer, Some(SessionDescription::answer("answer-from-me")));
        assert_eq!(mesh.signaling_state(&a), Some(SignalingState::Stable));
        assert_eq!(factory.created_count(&a), 1);
    }

    #[tokio::test]
    async fn stale_failure_spares_the_replacement_session() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");

        let old = mesh.ensure_session(&a).await.unwrap();
        mesh.remove_peer(&a, RemovalReason::Left).await;
        let new = mesh.ensure_session(&a).await.unwrap();
        assert_ne!(old, new);

        assert!(!mesh.on_transport_state(&a, old, TransportState::Failed).await);
        assert!(mesh.is_current(&a, new));
        assert!(!factory.transport(&a).unwrap().is_closed());
    }

    #[tokio::test]
    async fn debug_output_lists_peers() {
        let mesh = mesh_with(Arc::new(FakeTransportFactory::new("me")));
        mesh.ensure_session(&PeerId::from("a")).await.unwrap();
        let shown = format!("{mesh:?}");
        assert!(shown.contains("\"a\""), "{shown}");
        assert!(shown.contains("shut_down: false"), "{shown}");
    }

    #[tokio::test]
    async fn video_swap_reaches_every_session() {
        let factory = Arc::new(FakeTransportFactory::new("me"));
        let mesh = mesh_with(Arc::clone(&factory));
        let a = PeerId::from("a");
        let b = PeerId::from("b");
        mesh.ensure_session(&a).await.unwrap();
        mesh.ensure_session(&b).await.unwrap();

        let replaced = mesh
            .replace_outgoing_video(Some(test_track("screen", true)))
            .await;
        assert_eq!(replaced, 2);
        for peer in [&a, &b] {
            assert_eq!(
                factory.transport(peer).unwrap().video_track_id().as_deref(),
                Some("screen")
            );
        }

        // sessions created later pick up the current source
        let c = PeerId::from("c");
        mesh.ensure_session(&c).await.unwrap();
        assert_eq!(
            factory.transport(&c).unwrap().video_track_id().as_deref(),
            Some("screen")
        );
    }
}
