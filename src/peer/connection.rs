use crate::error::Result;
use crate::media::RemoteStream;
use crate::peer::ice::CandidateQueue;
use crate::peer::state::{SignalingEvent, SignalingState};
use crate::peer::types::{IceCandidate, PeerId};
use crate::transport::Transport;
use std::sync::Arc;

/// One transport session with one remote peer. Owned by the mesh registry.
pub struct PeerSession {
    id: PeerId,
    generation: u64,
    transport: Arc<dyn Transport>,
    signaling: SignalingState,
    local_description_set: bool,
    remote_description_set: bool,
    pending: CandidateQueue,
    remote_stream: Option<RemoteStream>,
}

impl PeerSession {
    pub fn new(id: PeerId, generation: u64, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            generation,
            transport,
            signaling: SignalingState::New,
            local_description_set: false,
            remote_description_set: false,
            pending: CandidateQueue::new(),
            remote_stream: None,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling
    }

    /// Validates `event` against the current state without applying it
    pub fn check(&self, event: SignalingEvent) -> Result<SignalingState> {
        self.signaling.apply(event)
    }

    /// Applies a description event and updates the description flags
    pub fn advance(&mut self, event: SignalingEvent) -> Result<SignalingState> {
        let next = self.signaling.apply(event)?;
        match event {
            SignalingEvent::SetLocalOffer | SignalingEvent::SetLocalAnswer => {
                self.local_description_set = true;
            }
            SignalingEvent::SetRemoteOffer | SignalingEvent::SetRemoteAnswer => {
                self.remote_description_set = true;
            }
            SignalingEvent::Close => {}
        }
        self.signaling = next;
        Ok(next)
    }

    pub fn local_description_set(&self) -> bool {
        self.local_description_set
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn enqueue_candidate(&mut self, candidate: IceCandidate) {
        self.pending.enqueue(candidate);
    }

    pub fn adopt_candidates(&mut self, orphans: CandidateQueue) {
        self.pending.append(orphans);
    }

    /// Empties the queue only once the remote description is known
    pub fn drain_if_ready(&mut self) -> Option<Vec<IceCandidate>> {
        if self.remote_description_set {
            Some(self.pending.take_all())
        } else {
            None
        }
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    pub fn record_remote_stream(&mut self, stream: RemoteStream) -> RemoteStream {
        let stream = match self.remote_stream.take() {
            Some(mut existing) => {
                existing.merge(stream);
                existing
            }
            None => stream,
        };
        self.remote_stream = Some(stream.clone());
        stream
    }
}

/// Read-only view of a session for observers and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub generation: u64,
    pub signaling: SignalingState,
    pub local_description_set: bool,
    pub remote_description_set: bool,
    pub pending_candidates: usize,
    pub has_remote_stream: bool,
}

impl From<&PeerSession> for PeerSnapshot {
    fn from(session: &PeerSession) -> Self {
        Self {
            id: session.id.clone(),
            generation: session.generation,
            signaling: session.signaling,
            local_description_set: session.local_description_set,
            remote_description_set: session.remote_description_set,
            pending_candidates: session.pending.len(),
            has_remote_stream: session.remote_stream.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    fn session() -> PeerSession {
        PeerSession::new(
            PeerId::from("a"),
            1,
            Arc::new(FakeTransport::new(PeerId::from("me"))),
        )
    }

    #[test]
    fn queue_held_until_remote_description() {
        let mut s = session();
        s.enqueue_candidate(IceCandidate::new("c1"));
        assert!(s.drain_if_ready().is_none());
        assert_eq!(s.pending_candidates(), 1);

        s.advance(SignalingEvent::SetRemoteOffer).unwrap();
        assert_eq!(s.drain_if_ready().unwrap(), vec![IceCandidate::new("c1")]);
        assert_eq!(s.pending_candidates(), 0);
    }

    #[test]
    fn rejected_event_leaves_flags_untouched() {
        let mut s = session();
        assert!(s.advance(SignalingEvent::SetRemoteAnswer).is_err());
        assert!(!s.remote_description_set());
        assert_eq!(s.signaling_state(), SignalingState::New);
    }

    #[test]
    fn remote_tracks_of_one_stream_merge() {
        let mut s = session();
        s.record_remote_stream(RemoteStream::new("x"));
        let merged = s.record_remote_stream(RemoteStream::new("x"));
        assert_eq!(merged.id(), "x");
        assert!(PeerSnapshot::from(&s).has_remote_stream);
    }
}
