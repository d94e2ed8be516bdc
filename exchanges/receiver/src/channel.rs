//! Receiver-side peer-channel wrapper (C6).
//!
//! Wraps a `webrtc` peer connection so the rest of the engine only sees
//! `handle_offer_and_create_answer`, `add_ice_candidate`, and a callback
//! for the opened data channel — never the ICE/SDP plumbing directly.
//!
//! Every peer connection is tagged with a generation number. Callbacks
//! registered on it (`on_ice_candidate`, `on_peer_connection_state_change`,
//! `on_data_channel`) capture that number and compare it against the
//! channel's current generation before acting, so a callback that fires
//! after the session has already moved on (cancelled, replaced) is a
//! no-op rather than touching state that no longer belongs to it.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use lan_file_sharer_common::error::{Result, SessionError};
use lan_file_sharer_protocol::{IceCandidateInit, SdpKind, SessionDescription};
use tracing::{debug, info, warn};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors,
        media_engine::MediaEngine, APIBuilder,
    },
    data_channel::RTCDataChannel,
    ice_transport::ice_candidate::RTCIceCandidateInit,
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
        RTCPeerConnection,
    },
};

use crate::state::SessionSlot;

/// The data-channel label both sides agree on (the sender creates it with
/// this label; the receiver recognizes it by the same label).
pub const DATA_CHANNEL_LABEL: &str = "lan-file-sharer-channel";

/// Receiver-side façade over one `webrtc` peer connection.
pub struct PeerChannel {
    peer_connection: Arc<RTCPeerConnection>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
}

impl PeerChannel {
    /// Builds a fresh peer connection with the default media engine and
    /// interceptor stack (no media tracks are negotiated; only data
    /// channels are used).
    pub async fn new(ice_servers: Vec<String>) -> Result<Self> {
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

        Ok(Self {
            peer_connection,
            generation: Arc::new(AtomicU64::new(1)),
            my_generation: 1,
        })
    }

    fn is_current(generation: &AtomicU64, expected: u64) -> bool {
        generation.load(Ordering::Acquire) == expected
    }

    /// Consumes the remote offer, registers candidate/data-channel
    /// callbacks, and returns the locally generated answer.
    ///
    /// `slot` receives every locally gathered ICE candidate via
    /// `push_candidate`, closing the stream once gathering completes.
    /// `on_data_channel` is invoked once, when the sender's data channel
    /// arrives, with the open channel handle.
    pub async fn handle_offer_and_create_answer<F>(
        &self,
        offer: SessionDescription,
        slot: SessionSlot,
        on_data_channel: F,
    ) -> Result<SessionDescription>
    where
        F: Fn(Arc<RTCDataChannel>) + Send + Sync + 'static,
    {
        if offer.kind != SdpKind::Offer {
            return Err(SessionError::ProtocolError(
                "expected an offer, got an answer".into(),
            ));
        }

        let remote_desc = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| SessionError::ProtocolError(e.to_string()))?;
        self.peer_connection
            .set_remote_description(remote_desc)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let generation = self.generation.clone();
        let expected = self.my_generation;
        let candidate_slot = slot.clone();
        self.peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let generation = generation.clone();
            let slot = candidate_slot.clone();
            Box::pin(async move {
                if !Self::is_current(&generation, expected) {
                    debug!("ignoring stale ice candidate callback");
                    return;
                }
                match candidate {
                    Some(c) => match c.to_json() {
                        Ok(json) => {
                            slot.push_candidate(IceCandidateInit {
                                candidate: json.candidate,
                                sdp_mid: json.sdp_mid,
                                sdp_mline_index: json.sdp_mline_index,
                            })
                            .await;
                        }
                        Err(e) => warn!(error = %e, "failed to serialize ice candidate"),
                    },
                    None => slot.close_candidate_stream().await,
                }
            })
        }));

        let generation = self.generation.clone();
        self.peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let generation = generation.clone();
                Box::pin(async move {
                    if !Self::is_current(&generation, expected) {
                        return;
                    }
                    info!(?state, "peer connection state changed");
                })
            },
        ));

        let generation = self.generation.clone();
        let on_data_channel = Arc::new(on_data_channel);
        self.peer_connection.on_data_channel(Box::new(move |dc| {
            let generation = generation.clone();
            let on_data_channel = on_data_channel.clone();
            Box::pin(async move {
                if !Self::is_current(&generation, expected) {
                    debug!("ignoring stale data channel callback");
                    return;
                }
                if dc.label() == DATA_CHANNEL_LABEL {
                    on_data_channel(dc);
                }
            })
        }));

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;

        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: answer.sdp,
        })
    }

    /// Feeds one trickled remote ICE candidate into the peer connection.
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

    /// Invalidates any callbacks still registered on this connection and
    /// closes it. Safe to call more than once.
    pub async fn close(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.peer_connection.close().await {
            warn!(error = %e, "error closing peer connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_channel_label_matches_sender_expectation() {
        assert_eq!(DATA_CHANNEL_LABEL, "lan-file-sharer-channel");
    }
}
