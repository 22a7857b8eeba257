use crate::peer::ice::candidate_kind;
use crate::peer::types::{IceCandidate, PeerId};
use tracing::debug;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Timestamp layout for log lines
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global subscriber. `RUST_LOG` wins over `filter`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_owned()))
        .with_target(false)
        .try_init();
}

/// Trickle-ICE trace of one candidate
pub fn dump_candidate(label: &str, peer: &PeerId, cand: &IceCandidate) {
    debug!(
        %peer,
        kind = ?candidate_kind(cand),
        sdp_mid = ?cand.sdp_mid,
        sdp_mline_index = ?cand.sdp_mline_index,
        "Trickle {label}: {}",
        cand.candidate
    );
}
