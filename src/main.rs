use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use tiptip_mesh::config::{MeshConfig, DEFAULT_LOG_FILTER, DEFAULT_RELAY_URL};
use tiptip_mesh::{
    logger, LocalMedia, LocalTrack, MeshEvent, RelayLink, RoomSession, ScreenCapture,
    WebRtcTransportFactory, WsRelay,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Join a room and keep the mesh running until Ctrl-C
#[derive(Parser, Debug)]
#[command(name = "tiptip-mesh", version)]
struct Args {
    /// Room slug to join
    #[arg(long, env = "TIPTIP_ROOM")]
    room: String,

    /// Display name announced to the room
    #[arg(long, env = "TIPTIP_NAME")]
    name: String,

    #[arg(long, env = "TIPTIP_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    relay_url: String,

    /// JSON array of ICE server entries
    #[arg(long, env = "TIPTIP_ICE_SERVERS")]
    ice_servers: Option<String>,

    #[arg(long, env = "TIPTIP_LOG", default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,

    /// Start presenting right after joining
    #[arg(long)]
    present: bool,
}

fn sample_track(id: &str, mime: &str) -> LocalTrack {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        "tiptip".to_owned(),
    ))
}

/// Stand-in capture source; media is produced elsewhere
struct SyntheticScreen;

#[async_trait]
impl ScreenCapture for SyntheticScreen {
    async fn start(&self) -> tiptip_mesh::Result<LocalTrack> {
        Ok(sample_track("screen", MIME_TYPE_VP8))
    }

    async fn stop(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = MeshConfig {
        relay_url: args.relay_url,
        log_filter: args.log_filter,
        ..Default::default()
    };
    if let Some(json) = &args.ice_servers {
        config = config
            .with_ice_servers_json(json)
            .context("invalid --ice-servers")?;
    }
    config.validate()?;
    logger::init(&config.log_filter);

    let relay: Arc<dyn RelayLink> = Arc::new(WsRelay::new(config.relay_url.clone()));
    let factory = Arc::new(
        WebRtcTransportFactory::new(config.ice_servers.clone())
            .context("failed to build WebRTC API")?,
    );
    let session = RoomSession::new(Arc::clone(&relay), factory, Arc::new(SyntheticScreen));

    let media = LocalMedia::new(
        Some(sample_track("microphone", MIME_TYPE_OPUS)),
        Some(sample_track("camera", MIME_TYPE_VP8)),
    );
    let mesh = session
        .join(&args.room, &args.name, media)
        .await
        .with_context(|| format!("failed to join room {}", args.room))?;
    info!(room = %args.room, relay = %config.relay_url, "joined");

    if args.present {
        if let Some(presentation) = session.presentation().await {
            presentation.start_presenting().await?;
        }
    }

    let mut events = mesh.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(MeshEvent::NameUpdated { peer, name }) => info!(%peer, %name, "peer named"),
                Ok(MeshEvent::RemoteStream { peer, stream }) => {
                    info!(%peer, stream = stream.id(), tracks = stream.tracks().len(), "remote media")
                }
                Ok(MeshEvent::PeerRemoved { peer, reason }) => info!(%peer, ?reason, "peer gone"),
                Ok(MeshEvent::PresenterChanged(presenter)) => info!(?presenter, "presenter"),
                Ok(MeshEvent::NegotiationFailed { peer, message }) => warn!(%peer, %message, "negotiation failed"),
                Ok(other) => info!(event = other.name(), "mesh event"),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.leave().await;
    relay.disconnect().await;
    Ok(())
}
