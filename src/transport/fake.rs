//! Scriptable in-memory transport
//!
//! Records every call, can be told to fail specific operations and emits
//! callbacks (local candidates, remote stream) once both descriptions are in
//! place, so mesh behaviour can be exercised without a network.

use crate::error::{MeshError, Result};
use crate::media::{is_video, LocalTrack, RemoteStream};
use crate::peer::state::TransportState;
use crate::peer::types::{IceCandidate, PeerId, SessionDescription};
use crate::transport::{Transport, TransportEvents, TransportFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Default)]
struct FakeState {
    tracks: Vec<String>,
    video: Option<String>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    closed: bool,
    reject_candidates: Vec<String>,
    fail_remote_description: bool,
    failing_answers: usize,
    stream_announced: bool,
}

/// Transport double for one peer
pub struct FakeTransport {
    owner: PeerId,
    events: Option<TransportEvents>,
    local_candidates: usize,
    track_gate: Option<Arc<Semaphore>>,
    close_gate: Option<Arc<Semaphore>>,
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn new(owner: PeerId) -> Self {
        Self {
            owner,
            events: None,
            local_candidates: 0,
            track_gate: None,
            close_gate: None,
            state: Mutex::new(FakeState::default()),
        }
    }

    fn with_events(
        owner: PeerId,
        events: TransportEvents,
        local_candidates: usize,
        track_gate: Option<Arc<Semaphore>>,
        close_gate: Option<Arc<Semaphore>>,
    ) -> Self {
        Self {
            owner,
            events: Some(events),
            local_candidates,
            track_gate,
            close_gate,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn reject_candidates_containing(&self, needle: &str) {
        self.state.lock().reject_candidates.push(needle.to_owned());
    }

    pub fn fail_remote_description(&self, fail: bool) {
        self.state.lock().fail_remote_description = fail;
    }

    /// The next `n` calls to `create_answer` fail
    pub fn fail_next_answers(&self, n: usize) {
        self.state.lock().failing_answers = n;
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().applied.clone()
    }

    /// Track ids attached through `add_track`, in order
    pub fn track_ids(&self) -> Vec<String> {
        self.state.lock().tracks.clone()
    }

    /// Id of the track currently carried by the video sender
    pub fn video_track_id(&self) -> Option<String> {
        self.state.lock().video.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Simulates a connectivity change reported by the network stack
    pub fn report_state(&self, state: TransportState) {
        if let Some(events) = &self.events {
            events.state_changed(state);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().closed {
            return Err(MeshError::Transport("transport closed".into()));
        }
        Ok(())
    }

    fn maybe_connected(&self) {
        let announce = {
            let mut st = self.state.lock();
            let ready = st.local.is_some() && st.remote.is_some() && !st.stream_announced;
            if ready {
                st.stream_announced = true;
            }
            ready
        };
        if let (true, Some(events)) = (announce, &self.events) {
            events.remote_stream(RemoteStream::new(format!("stream-{}", events.peer())));
            events.state_changed(TransportState::Connected);
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn add_track(&self, track: LocalTrack) -> Result<()> {
        if let Some(gate) = &self.track_gate {
            // a closed gate lets everything through
            let _ = gate.acquire().await;
        }
        self.ensure_open()?;
        let mut st = self.state.lock();
        st.tracks.push(track.id().to_owned());
        if is_video(&track) {
            st.video = Some(track.id().to_owned());
        }
        Ok(())
    }

    async fn replace_video_track(&self, track: Option<LocalTrack>) -> Result<bool> {
        self.ensure_open()?;
        let mut st = self.state.lock();
        if st.video.is_none() {
            return Ok(false);
        }
        st.video = track.map(|t| t.id().to_owned());
        Ok(true)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        tokio::task::yield_now().await;
        Ok(SessionDescription::offer(format!("offer-from-{}", self.owner)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        {
            let mut st = self.state.lock();
            if st.remote.is_none() {
                return Err(MeshError::Transport("no remote offer".into()));
            }
            if st.failing_answers > 0 {
                st.failing_answers -= 1;
                return Err(MeshError::Transport("answer generation failed".into()));
            }
        }
        tokio::task::yield_now().await;
        Ok(SessionDescription::answer(format!("answer-from-{}", self.owner)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let first = {
            let mut st = self.state.lock();
            let first = st.local.is_none();
            st.local = Some(desc);
            first
        };
        if first {
            if let Some(events) = &self.events {
                for n in 0..self.local_candidates {
                    events.local_candidate(IceCandidate::new(format!(
                        "candidate:{n} 1 udp 2122260223 {} {} typ host",
                        self.owner,
                        50000 + n
                    )));
                }
            }
        }
        self.maybe_connected();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        {
            let mut st = self.state.lock();
            if st.fail_remote_description || desc.sdp.is_empty() {
                return Err(MeshError::Transport("malformed remote description".into()));
            }
            st.remote = Some(desc);
        }
        self.maybe_connected();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.ensure_open()?;
        let mut st = self.state.lock();
        if st.remote.is_none() {
            return Err(MeshError::Transport(
                "candidate before remote description".into(),
            ));
        }
        if st
            .reject_candidates
            .iter()
            .any(|needle| candidate.candidate.contains(needle.as_str()))
        {
            return Err(MeshError::Transport("stale candidate".into()));
        }
        st.applied.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(gate) = &self.close_gate {
            let _ = gate.acquire().await;
        }
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Factory that hands out [`FakeTransport`]s and keeps them for inspection
pub struct FakeTransportFactory {
    owner: PeerId,
    local_candidates: usize,
    created: Mutex<HashMap<PeerId, Vec<Arc<FakeTransport>>>>,
    failing: Mutex<HashSet<PeerId>>,
    track_gate: Mutex<Option<Arc<Semaphore>>>,
    close_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeTransportFactory {
    /// `owner` is the local identity, used to label generated descriptions
    pub fn new(owner: impl Into<PeerId>) -> Self {
        Self {
            owner: owner.into(),
            local_candidates: 0,
            created: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            track_gate: Mutex::new(None),
            close_gate: Mutex::new(None),
        }
    }

    /// Emit `n` local candidates after each first local description
    pub fn with_local_candidates(mut self, n: usize) -> Self {
        self.local_candidates = n;
        self
    }

    /// Every transport created for `peer` rejects remote descriptions
    pub fn fail_negotiation_with(&self, peer: impl Into<PeerId>) {
        self.failing.lock().insert(peer.into());
    }

    /// Transports created from now on park in `add_track` until the returned
    /// gate gets permits or is closed
    pub fn hold_track_attachment(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.track_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Same as [`hold_track_attachment`](Self::hold_track_attachment) for `close`
    pub fn hold_close(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.close_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Latest transport created for `peer`
    pub fn transport(&self, peer: &PeerId) -> Option<Arc<FakeTransport>> {
        self.created
            .lock()
            .get(peer)
            .and_then(|all| all.last().cloned())
    }

    /// How many transports were ever created for `peer`
    pub fn created_count(&self, peer: &PeerId) -> usize {
        self.created.lock().get(peer).map_or(0, Vec::len)
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(&self, peer: &PeerId, events: TransportEvents) -> Result<Arc<dyn Transport>> {
        let transport = Arc::new(FakeTransport::with_events(
            self.owner.clone(),
            events,
            self.local_candidates,
            self.track_gate.lock().clone(),
            self.close_gate.lock().clone(),
        ));
        if self.failing.lock().contains(peer) {
            transport.fail_remote_description(true);
        }
        tokio::task::yield_now().await;
        self.created
            .lock()
            .entry(peer.clone())
            .or_default()
            .push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// Sample-based local track for tests and demos
pub fn test_track(id: &str, video: bool) -> LocalTrack {
    use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    let mime = if video { MIME_TYPE_VP8 } else { MIME_TYPE_OPUS };
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        "local".to_owned(),
    ))
}
