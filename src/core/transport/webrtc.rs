//! WebRTC peer transport.
//!
//! Builds the peer connection, attaches the local audio track, creates the
//! ordered control data channel, and runs the offer/answer exchange against
//! the provider negotiation endpoint. The session manager owns the returned
//! handles; transport events are routed back through [`TransportHooks`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_PCMU, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::ControlChannel;
use crate::auth::EphemeralCredential;
use crate::core::media::{self, AudioFrame};
use crate::errors::{SessionError, SessionResult};

/// Public STUN server used for ICE.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Label of the ordered control data channel.
pub const DATA_CHANNEL_LABEL: &str = "oai-events";

/// Callbacks routed from transport events back to the session manager.
pub struct TransportHooks {
    /// Peer connection state changed.
    pub on_peer_state: Box<dyn Fn(RTCPeerConnectionState) + Send + Sync>,
    /// A remote audio track arrived.
    pub on_remote_track: Box<dyn Fn(Arc<TrackRemote>) + Send + Sync>,
    /// A text frame arrived on the control channel.
    pub on_channel_message: Box<dyn Fn(String) + Send + Sync>,
    /// The control channel reported an error.
    pub on_channel_error: Box<dyn Fn(String) + Send + Sync>,
    /// The control channel closed.
    pub on_channel_close: Box<dyn Fn() + Send + Sync>,
}

/// Handles produced by [`create_peer`].
pub struct PeerSetup {
    /// The peer connection.
    pub peer: Arc<RTCPeerConnection>,
    /// The ordered control channel.
    pub channel: Arc<DataChannelTransport>,
    /// The local audio track fed by the sample pump.
    pub local_track: Arc<TrackLocalStaticSample>,
}

/// Build the peer connection, local track, and control channel, and wire
/// the transport hooks. Negotiation happens separately in [`negotiate`].
pub async fn create_peer(hooks: TransportHooks) -> SessionResult<PeerSetup> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_transport)?;
    let registry =
        register_default_interceptors(Registry::new(), &mut media_engine).map_err(to_transport)?;
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec![DEFAULT_STUN_SERVER.to_string()],
            ..Default::default()
        }],
        ..Default::default()
    };

    let peer = Arc::new(
        api.new_peer_connection(config)
            .await
            .map_err(to_transport)?,
    );
    let hooks = Arc::new(hooks);

    {
        let hooks = hooks.clone();
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let hooks = hooks.clone();
            Box::pin(async move {
                (hooks.on_peer_state)(state);
            })
        }));
    }

    {
        let hooks = hooks.clone();
        peer.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let hooks = hooks.clone();
            Box::pin(async move {
                if track.kind() == RTPCodecType::Audio {
                    info!(ssrc = track.ssrc(), "remote audio track arrived");
                    (hooks.on_remote_track)(track);
                } else {
                    trace!("ignoring non-audio remote track");
                }
            })
        }));
    }

    // Candidate gathering anomalies are logged, never fatal.
    peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        Box::pin(async move {
            match candidate {
                Some(c) => trace!(candidate = ?c, "gathered ICE candidate"),
                None => debug!("ICE candidate gathering complete"),
            }
        })
    }));

    let local_track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_PCMU.to_owned(),
            clock_rate: media::TRACK_SAMPLE_RATE,
            channels: 1,
            ..Default::default()
        },
        "audio".to_string(),
        "voicelink".to_string(),
    ));

    let rtp_sender = peer
        .add_track(Arc::clone(&local_track) as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(to_transport)?;

    // Drain RTCP for the sender so the interceptors keep flowing.
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while rtp_sender.read(&mut buf).await.is_ok() {}
    });

    let dc = peer
        .create_data_channel(
            DATA_CHANNEL_LABEL,
            Some(RTCDataChannelInit {
                ordered: Some(true),
                ..Default::default()
            }),
        )
        .await
        .map_err(to_transport)?;

    let channel = Arc::new(DataChannelTransport::new(dc.clone()));

    {
        let open_tx = channel.open_tx.clone();
        dc.on_open(Box::new(move || {
            info!("control channel open");
            let _ = open_tx.send(true);
            Box::pin(async {})
        }));
    }

    {
        let hooks = hooks.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let hooks = hooks.clone();
            Box::pin(async move {
                if msg.is_string {
                    match String::from_utf8(msg.data.to_vec()) {
                        Ok(text) => (hooks.on_channel_message)(text),
                        Err(_) => warn!("discarding non-UTF8 control frame"),
                    }
                } else {
                    warn!(
                        bytes = msg.data.len(),
                        "discarding binary control frame"
                    );
                }
            })
        }));
    }

    {
        let hooks = hooks.clone();
        dc.on_error(Box::new(move |err| {
            let hooks = hooks.clone();
            Box::pin(async move {
                (hooks.on_channel_error)(err.to_string());
            })
        }));
    }

    {
        let hooks = hooks.clone();
        let open_tx = channel.open_tx.clone();
        dc.on_close(Box::new(move || {
            let _ = open_tx.send(false);
            (hooks.on_channel_close)();
            Box::pin(async {})
        }));
    }

    Ok(PeerSetup {
        peer,
        channel,
        local_track,
    })
}

/// Run the offer/answer exchange: create the local offer, wait for ICE
/// gathering, POST the offer SDP to the negotiation endpoint with the
/// ephemeral credential and voice as query parameters, and apply the
/// returned answer.
pub async fn negotiate(
    peer: &Arc<RTCPeerConnection>,
    http: &reqwest::Client,
    endpoint: &str,
    credential: &EphemeralCredential,
    voice: Option<&str>,
) -> SessionResult<()> {
    let mut url = url::Url::parse(endpoint)
        .map_err(|e| SessionError::Negotiation(format!("invalid negotiation endpoint: {e}")))?;
    url.query_pairs_mut()
        .append_pair("token", &credential.secret);
    if let Some(voice) = voice {
        url.query_pairs_mut().append_pair("voice", voice);
    }

    let offer = peer.create_offer(None).await.map_err(to_negotiation)?;

    let mut gather_complete = peer.gathering_complete_promise().await;
    peer.set_local_description(offer)
        .await
        .map_err(to_negotiation)?;
    let _ = gather_complete.recv().await;

    let local = peer.local_description().await.ok_or_else(|| {
        SessionError::Negotiation("no local description after ICE gathering".to_string())
    })?;

    debug!(endpoint, "posting SDP offer");

    let response = http
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/sdp")
        .body(local.sdp.clone())
        .send()
        .await
        .map_err(|e| SessionError::Negotiation(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SessionError::Negotiation(format!(
            "negotiation endpoint returned {status}: {body}"
        )));
    }

    let answer_sdp = response
        .text()
        .await
        .map_err(|e| SessionError::Negotiation(e.to_string()))?;

    let answer = RTCSessionDescription::answer(answer_sdp).map_err(to_negotiation)?;
    peer.set_remote_description(answer)
        .await
        .map_err(to_negotiation)?;

    info!("SDP answer applied");
    Ok(())
}

/// Pump local audio frames into the track as mu-law samples. While muted
/// the pump writes silence so the track cadence is preserved.
pub fn spawn_audio_pump(
    mut frames: mpsc::UnboundedReceiver<AudioFrame>,
    track: Arc<TrackLocalStaticSample>,
    muted: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let pcm = media::downsample_to_track_rate(&frame.samples, frame.sample_rate);
            let payload = if muted.load(Ordering::Relaxed) {
                vec![media::ULAW_SILENCE; pcm.len()]
            } else {
                media::encode_ulaw(&pcm)
            };
            let duration = Duration::from_millis(
                payload.len() as u64 * 1000 / u64::from(media::TRACK_SAMPLE_RATE),
            );
            let sample = Sample {
                data: Bytes::from(payload),
                duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!("audio pump stopping: {e}");
                break;
            }
        }
        trace!("audio pump ended");
    })
}

// =============================================================================
// Control Channel
// =============================================================================

/// The ordered WebRTC data channel behind the [`ControlChannel`] seam.
pub struct DataChannelTransport {
    dc: Arc<RTCDataChannel>,
    open_tx: watch::Sender<bool>,
    open_rx: watch::Receiver<bool>,
}

impl DataChannelTransport {
    fn new(dc: Arc<RTCDataChannel>) -> Self {
        let (open_tx, open_rx) = watch::channel(false);
        Self {
            dc,
            open_tx,
            open_rx,
        }
    }

    /// Wait until the channel opens, bounded by `timeout`.
    pub async fn wait_open(&self, timeout: Duration) -> SessionResult<()> {
        let mut rx = self.open_rx.clone();
        tokio::time::timeout(timeout, async move {
            loop {
                if *rx.borrow() {
                    return Ok(());
                }
                rx.changed().await.map_err(|_| {
                    SessionError::Transport("control channel dropped before opening".to_string())
                })?;
            }
        })
        .await
        .map_err(|_| SessionError::Timeout("control channel did not open".to_string()))?
    }
}

#[async_trait]
impl ControlChannel for DataChannelTransport {
    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, payload: String) -> SessionResult<()> {
        if !self.is_open() {
            return Err(SessionError::ChannelNotOpen);
        }
        self.dc
            .send_text(payload)
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Send(e.to_string()))
    }

    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn ready_state(&self) -> String {
        self.dc.ready_state().to_string()
    }
}

fn to_transport(e: webrtc::Error) -> SessionError {
    SessionError::Transport(e.to_string())
}

fn to_negotiation(e: webrtc::Error) -> SessionError {
    SessionError::Negotiation(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_hooks() -> TransportHooks {
        TransportHooks {
            on_peer_state: Box::new(|_| {}),
            on_remote_track: Box::new(|_| {}),
            on_channel_message: Box::new(|_| {}),
            on_channel_error: Box::new(|_| {}),
            on_channel_close: Box::new(|| {}),
        }
    }

    #[tokio::test]
    async fn test_create_peer_produces_closed_channel() {
        let setup = create_peer(noop_hooks()).await.unwrap();
        assert_eq!(setup.channel.label(), DATA_CHANNEL_LABEL);
        assert!(!setup.channel.is_open());
        let _ = setup.peer.close().await;
    }

    #[tokio::test]
    async fn test_send_on_unopened_channel_fails() {
        let setup = create_peer(noop_hooks()).await.unwrap();
        match setup.channel.send("{}".to_string()).await {
            Err(SessionError::ChannelNotOpen) => {}
            other => panic!("expected ChannelNotOpen, got {other:?}"),
        }
        let _ = setup.peer.close().await;
    }

    #[tokio::test]
    async fn test_wait_open_times_out_without_peer() {
        let setup = create_peer(noop_hooks()).await.unwrap();
        match setup.channel.wait_open(Duration::from_millis(50)).await {
            Err(SessionError::Timeout(_)) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
        let _ = setup.peer.close().await;
    }

    #[tokio::test]
    async fn test_negotiate_rejects_invalid_endpoint() {
        let setup = create_peer(noop_hooks()).await.unwrap();
        let credential = EphemeralCredential {
            secret: "ek_test".to_string(),
            session_id: None,
            expires_at: None,
        };
        let http = reqwest::Client::new();
        match negotiate(&setup.peer, &http, "not a url", &credential, None).await {
            Err(SessionError::Negotiation(msg)) => {
                assert!(msg.contains("invalid negotiation endpoint"));
            }
            other => panic!("expected Negotiation error, got {other:?}"),
        }
        let _ = setup.peer.close().await;
    }
}
