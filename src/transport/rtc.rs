//! `webrtc` crate implementation of the transport seam

use crate::config::{get_user_ice_servers, ServerConfig};
use crate::error::{MeshError, Result};
use crate::logger::dump_candidate;
use crate::media::{is_video, LocalTrack, RemoteStream};
use crate::peer::state::TransportState;
use crate::peer::types::{IceCandidate, PeerId, SdpKind, SessionDescription};
use crate::transport::{Transport, TransportEvents, TransportFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Builds one peer connection per remote peer from a shared API instance
pub struct WebRtcTransportFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransportFactory {
    pub fn new(servers: Vec<ServerConfig>) -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: get_user_ice_servers(servers),
        })
    }

    fn rtc_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ice_candidate_pool_size: 10,
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self, peer: &PeerId, events: TransportEvents) -> Result<Arc<dyn Transport>> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config()).await?);

        let cand_events = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let events = cand_events.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(c) = cand else {
                    debug!(peer = %events.peer(), "ICE gathering completed");
                    return;
                };
                match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        };
                        dump_candidate("LOCAL", events.peer(), &candidate);
                        events.local_candidate(candidate);
                    }
                    Err(e) => warn!(peer = %events.peer(), error = %e, "unserializable local candidate"),
                }
            })
        }));

        let track_events = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _tr: Arc<RTCRtpTransceiver>| {
                let stream_id = track.stream_id();
                debug!(peer = %track_events.peer(), %stream_id, kind = ?track.kind(), "remote track");
                track_events.remote_stream(RemoteStream::with_track(stream_id, track));
                Box::pin(async {})
            },
        ));

        let ice_events = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |st: RTCIceConnectionState| {
            debug!(peer = %ice_events.peer(), state = ?st, "ICE connection state changed");
            if let Some(state) = map_ice_state(st) {
                ice_events.state_changed(state);
            }
            Box::pin(async {})
        }));

        let log_peer = peer.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!(peer = %log_peer, state = ?st, "peer connection state changed");
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcTransport {
            peer: peer.clone(),
            pc,
            video_sender: Mutex::new(None),
        }))
    }
}

fn map_ice_state(st: RTCIceConnectionState) -> Option<TransportState> {
    let state = match st {
        RTCIceConnectionState::New => TransportState::New,
        RTCIceConnectionState::Checking => TransportState::Checking,
        RTCIceConnectionState::Connected => TransportState::Connected,
        RTCIceConnectionState::Completed => TransportState::Completed,
        RTCIceConnectionState::Disconnected => TransportState::Disconnected,
        RTCIceConnectionState::Failed => TransportState::Failed,
        RTCIceConnectionState::Closed => TransportState::Closed,
        _ => return None,
    };
    Some(state)
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(MeshError::Transport(format!(
            "unsupported description type {other:?}"
        ))),
    }
}

/// One `RTCPeerConnection` plus its outgoing video sender
pub struct WebRtcTransport {
    peer: PeerId,
    pc: Arc<RTCPeerConnection>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn add_track(&self, track: LocalTrack) -> Result<()> {
        let video = is_video(&track);
        let sender = self.pc.add_track(track).await?;
        if video {
            *self.video_sender.lock() = Some(Arc::clone(&sender));
        }

        // RTCP has to be read for interceptors to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn replace_video_track(&self, track: Option<LocalTrack>) -> Result<bool> {
        let sender = self.video_sender.lock().clone();
        match sender {
            Some(sender) => {
                sender.replace_track(track).await?;
                Ok(true)
            }
            None => {
                debug!(peer = %self.peer, "no video sender to replace");
                Ok(false)
            }
        }
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
