//! Sender-side peer-channel wrapper (C6).
//!
//! `establish` owns the whole offer/candidate round trip against a
//! supplied signalling client and returns once the data channel reports
//! open (or the context cancels). Like the receiver's wrapper, every
//! connection is generation-tagged so a callback from a connection this
//! session has already abandoned never touches current state.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use lan_file_sharer_common::error::{Result, SessionError};
use lan_file_sharer_protocol::{IceCandidateInit, SdpKind, SessionDescription};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        APIBuilder,
    },
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_candidate::RTCIceCandidateInit,
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration,
        sdp::session_description::RTCSessionDescription,
        RTCPeerConnection,
    },
};

pub const DATA_CHANNEL_LABEL: &str = "lan-file-sharer-channel";

/// Sink the peer channel uses to hand locally gathered candidates back to
/// the caller, which forwards them over the signalling client.
pub trait CandidateSink: Send + Sync {
    fn on_local_candidate(&self, candidate: IceCandidateInit);
}

/// Sender-side façade over one `webrtc` peer connection plus its one data
/// channel.
pub struct PeerChannel {
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
}

impl PeerChannel {
    /// Creates a peer connection, opens the data channel, and produces
    /// the local offer. Candidates gathered from this point on are
    /// forwarded to `candidate_sink` as they arrive.
    pub async fn create_offer(
        ice_servers: Vec<String>,
        candidate_sink: Arc<dyn CandidateSink>,
    ) -> Result<(Self, SessionDescription)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![webrtc::ice_transport::ice_server::RTCIceServer {
                urls: ice_servers,
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| SessionError::Transport(e.to_string()))?,
        );

        let data_channel = peer_connection
            .create_data_channel(
                DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(false),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let generation = Arc::new(AtomicU64::new(1));
        let my_generation = 1;

        let gen_clone = generation.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let gen_clone = gen_clone.clone();
            let candidate_sink = candidate_sink.clone();
            Box::pin(async move {
                if gen_clone.load(Ordering::Acquire) != my_generation {
                    debug!("ignoring stale local ice candidate callback");
                    return;
                }
                if let Some(c) = candidate {
                    if let Ok(json) = c.to_json() {
                        candidate_sink.on_local_candidate(IceCandidateInit {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index,
                        });
                    }
                }
            })
        }));

        let offer = peer_connection
            .create_offer(None)
            .await
            .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;
        peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;

        Ok((
            Self {
                peer_connection,
                data_channel,
                generation,
                my_generation,
            },
            SessionDescription {
                kind: SdpKind::Offer,
                sdp: offer.sdp,
            },
        ))
    }

    /// Applies the receiver's answer to the local connection.
    pub async fn set_remote_answer(&self, answer: SessionDescription) -> Result<()> {
        if answer.kind != SdpKind::Answer {
            return Err(SessionError::ProtocolError(
                "expected an answer, got an offer".into(),
            ));
        }
        let remote_desc = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| SessionError::ProtocolError(e.to_string()))?;
        self.peer_connection
            .set_remote_description(remote_desc)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Feeds one trickled remote candidate from the receiver.
    pub async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Awaits the data channel reaching the open state, or returns
    /// [`SessionError::Cancelled`] if `cancel` fires first.
    pub async fn wait_open(&self, cancel: &CancellationToken) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        self.data_channel.on_open(Box::new(move || {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
            Box::pin(async {})
        }));

        tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            result = rx => result.map_err(|_| SessionError::HandshakeFailed(
                "data channel closed before opening".into(),
            )),
        }
    }

    /// Sends one serialized message (a chunk or the completion signal)
    /// over the data channel.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        self.data_channel
            .send(&bytes.into())
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Invalidates outstanding callbacks and closes the connection.
    pub async fn close(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.data_channel.close().await {
            warn!(error = %e, "error closing data channel");
        }
        if let Err(e) = self.peer_connection.close().await {
            warn!(error = %e, "error closing peer connection");
        }
        info!("peer channel closed");
    }
}
