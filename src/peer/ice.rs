use crate::peer::types::{IceCandidate, PeerId};
use crate::transport::Transport;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Remote candidates held until the remote description is known.
///
/// Insertion order is application order; nothing is merged or deduplicated.
#[derive(Debug, Default, Clone)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Moves every candidate of `other` behind the ones already queued
    pub fn append(&mut self, other: CandidateQueue) {
        self.pending.extend(other.pending);
    }

    pub fn take_all(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IceCandidate> {
        self.pending.iter()
    }
}

/// Applies drained candidates in FIFO order; a failing candidate is logged and skipped.
///
/// Returns how many were accepted by the transport.
pub async fn apply_pending_candidates(
    transport: &dyn Transport,
    peer: &PeerId,
    candidates: Vec<IceCandidate>,
) -> usize {
    let mut applied = 0;
    for candidate in candidates {
        debug!(%peer, candidate = %candidate.candidate, "applying queued candidate");
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => warn!(%peer, error = %e, "failed to apply queued candidate"),
        }
    }
    applied
}

/// Candidate type as announced by the `typ` token of the candidate line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

pub fn candidate_kind(candidate: &IceCandidate) -> CandidateKind {
    let mut tokens = candidate.candidate.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "typ" {
            return match tokens.next() {
                Some("host") => CandidateKind::Host,
                Some("srflx") => CandidateKind::ServerReflexive,
                Some("prflx") => CandidateKind::PeerReflexive,
                Some("relay") => CandidateKind::Relay,
                _ => CandidateKind::Unknown,
            };
        }
    }
    CandidateKind::Unknown
}
