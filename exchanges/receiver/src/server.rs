//! HTTP signalling server (C5, receiver side).
//!
//! Exposes the two routes from the wire protocol: `POST /ask` (which
//! carries the offer inline and, on success, stays open as a single
//! long-lived SSE stream delivering the answer followed by trickled ICE
//! candidates), and `POST /candidate` for candidates trickled back from
//! the sender. `ConcurrencyGuard` wraps the whole `/ask` connection, not
//! just the initial handshake, so a second ask genuinely sees 503 for as
//! long as the first transfer is in flight.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use futures_lite::stream;
use lan_file_sharer_common::{guard::ConcurrencyPermit, ConcurrencyGuard};
use lan_file_sharer_entities::{leaves, manifest, FileNode, SignedManifest};
use lan_file_sharer_protocol::{AskEvent, AskRequest, ErrorBody, IceCandidateInit, SessionDescription};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::{
    channel::PeerChannel,
    file_receiver::FileReceiver,
    state::{Decision, SessionSlot},
};

/// Emitted once per accepted ask, so the hosting application (CLI, UI)
/// can prompt the user and eventually call [`ReceiverServerState::decide`].
#[derive(Clone, Debug)]
pub struct PendingAsk {
    pub files: Vec<FileNode>,
}

#[derive(Clone)]
pub struct ReceiverServerState {
    pub guard: ConcurrencyGuard,
    pub slot: SessionSlot,
    pub file_receiver: Arc<FileReceiver>,
    pub ice_servers: Vec<String>,
    pub pending_ask_tx: mpsc::Sender<PendingAsk>,
    /// The peer channel for the in-flight session, if the handshake has
    /// gotten far enough to have created one. `/candidate` forwards the
    /// sender's trickled candidates here (C6), per §4.5; cleared whenever
    /// the session ends so a later ask never posts into a stale channel.
    active_channel: Arc<AsyncMutex<Option<Arc<PeerChannel>>>>,
}

impl ReceiverServerState {
    pub fn new(
        file_receiver: Arc<FileReceiver>,
        ice_servers: Vec<String>,
        pending_ask_tx: mpsc::Sender<PendingAsk>,
    ) -> Self {
        Self {
            guard: ConcurrencyGuard::new(),
            slot: SessionSlot::new(),
            file_receiver,
            ice_servers,
            pending_ask_tx,
            active_channel: Arc::new(AsyncMutex::new(None)),
        }
    }

    pub async fn decide(&self, decision: Decision) {
        self.slot.decide(decision).await;
    }

    async fn set_active_channel(&self, channel: Option<Arc<PeerChannel>>) {
        *self.active_channel.lock().await = channel;
    }
}

pub fn router(state: ReceiverServerState) -> Router {
    Router::new()
        .route("/ask", post(ask_handler))
        .route("/candidate", post(candidate_handler))
        .with_state(state)
}

/// Header every signalling request must carry, identifying the calling
/// sender instance (not validated against any allowlist; its only role
/// here is to be present, per the wire contract).
const SERVICE_ID_HEADER: &str = "x-service-id";

fn require_service_id(headers: &HeaderMap) -> Result<(), Response> {
    if headers.get(SERVICE_ID_HEADER).is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new("missing X-Service-ID header")),
        )
            .into_response());
    }
    Ok(())
}

async fn ask_handler(
    State(state): State<ReceiverServerState>,
    headers: HeaderMap,
    Json(request): Json<AskRequest>,
) -> Response {
    if let Err(response) = require_service_id(&headers) {
        return response;
    }

    let Some(permit) = state.guard.try_acquire() else {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorBody::new("system is busy")))
            .into_response();
    };

    let signed = SignedManifest {
        files: request.files.clone(),
        public_key: request.public_key.clone(),
        signature: request.signature.clone(),
    };
    if manifest::verify(&signed).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new("manifest signature is invalid")),
        )
            .into_response();
    }

    if let Err(e) = state.slot.set_offer(request.offer.clone()).await {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorBody::new(e.to_string())))
            .into_response();
    }
    let decision_source = match state.slot.prepare().await {
        Ok(source) => source,
        Err(e) => {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorBody::new(e.to_string())))
                .into_response()
        }
    };

    info!(file_count = request.files.len(), "ask received, awaiting user decision");
    let _ = state
        .pending_ask_tx
        .send(PendingAsk {
            files: request.files.clone(),
        })
        .await;

    let stream_state = AskStreamState::AwaitDecision {
        permit,
        decision: decision_source.decision,
        offer: request.offer,
        files: request.files,
        state,
    };

    Sse::new(stream::unfold(stream_state, step_ask_stream)).keep_alive(KeepAlive::default()).into_response()
}

async fn candidate_handler(
    State(state): State<ReceiverServerState>,
    headers: HeaderMap,
    Json(candidate): Json<IceCandidateInit>,
) -> Response {
    if let Err(response) = require_service_id(&headers) {
        return response;
    }
    let channel = state.active_channel.lock().await.clone();
    let Some(channel) = channel else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody::new("no active peer connection")),
        )
            .into_response();
    };
    if let Err(e) = channel.add_ice_candidate(candidate).await {
        warn!(error = %e, "failed to apply trickled remote candidate");
    }
    StatusCode::OK.into_response()
}

/// Internal state machine driving the `/ask` SSE response: wait for the
/// user's decision, then (if accepted) hand off to the peer-channel
/// handshake and forward trickled candidates until the stream closes.
enum AskStreamState {
    AwaitDecision {
        permit: ConcurrencyPermit,
        decision: oneshot::Receiver<Decision>,
        offer: SessionDescription,
        files: Vec<FileNode>,
        state: ReceiverServerState,
    },
    StreamCandidates {
        permit: ConcurrencyPermit,
        candidates: mpsc::Receiver<IceCandidateInit>,
        state: ReceiverServerState,
    },
    Done,
}

async fn step_ask_stream(
    st: AskStreamState,
) -> Option<(Result<Event, std::convert::Infallible>, AskStreamState)> {
    match st {
        AskStreamState::AwaitDecision {
            permit,
            decision,
            offer,
            files,
            state,
        } => match decision.await {
            Ok(Decision::Reject) | Err(_) => {
                info!("ask rejected or decision channel dropped");
                state.slot.close().await;
                state.set_active_channel(None).await;
                let event = Event::default().json_data(AskEvent::Rejected).unwrap();
                Some((Ok(event), AskStreamState::Done))
            }
            Ok(Decision::Accept) => {
                state.file_receiver.set_expected_file_count(leaves(&files).len());
                for node in leaves(&files) {
                    if let Err(e) = state
                        .file_receiver
                        .register_file(&node.relative_path, &node.relative_path, node.size, node.sha256_hex.clone())
                        .await
                    {
                        warn!(error = %e, "failed to register file for reception");
                    }
                }

                let channel = match PeerChannel::new(state.ice_servers.clone()).await {
                    Ok(c) => Arc::new(c),
                    Err(e) => {
                        warn!(error = %e, "failed to create peer channel");
                        state.slot.close().await;
                        state.set_active_channel(None).await;
                        return Some((
                            Ok(Event::default().json_data(AskEvent::Rejected).unwrap()),
                            AskStreamState::Done,
                        ));
                    }
                };
                state.set_active_channel(Some(channel.clone())).await;

                let file_receiver = state.file_receiver.clone();
                let answer = channel
                    .handle_offer_and_create_answer(offer, state.slot.clone(), move |dc| {
                        let file_receiver = file_receiver.clone();
                        dc.on_message(Box::new(move |msg| {
                            let file_receiver = file_receiver.clone();
                            let data = msg.data.to_vec();
                            Box::pin(async move {
                                match lan_file_sharer_protocol::DataChannelMessage::from_bytes(&data) {
                                    Ok(lan_file_sharer_protocol::DataChannelMessage::Chunk(chunk)) => {
                                        if let Err(e) = file_receiver.write_chunk(chunk).await {
                                            warn!(error = %e, "failed to write chunk");
                                        }
                                    }
                                    Ok(lan_file_sharer_protocol::DataChannelMessage::TransferComplete) => {
                                        info!("transfer complete signal received");
                                    }
                                    Err(e) => warn!(error = %e, "malformed data channel message"),
                                }
                            })
                        }));
                    })
                    .await;

                let answer = match answer {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(error = %e, "handshake failed");
                        state.slot.close().await;
                        state.set_active_channel(None).await;
                        channel.close().await;
                        return Some((
                            Ok(Event::default().json_data(AskEvent::Rejected).unwrap()),
                            AskStreamState::Done,
                        ));
                    }
                };

                state.slot.set_answer(answer.clone()).await;
                let candidates = state.slot.take_candidate_source().await;

                let event = Event::default()
                    .event("answer")
                    .json_data(AskEvent::Accepted { answer: answer.clone() })
                    .unwrap();
                Some((
                    Ok(event),
                    AskStreamState::StreamCandidates {
                        permit,
                        candidates,
                        state,
                    },
                ))
            }
        },
        AskStreamState::StreamCandidates {
            permit,
            mut candidates,
            state,
        } => match candidates.recv().await {
            Some(candidate) => {
                let event = Event::default().event("candidate").json_data(candidate).unwrap();
                Some((
                    Ok(event),
                    AskStreamState::StreamCandidates {
                        permit,
                        candidates,
                        state,
                    },
                ))
            }
            None => {
                state.slot.close().await;
                state.set_active_channel(None).await;
                drop(permit);
                None
            }
        },
        AskStreamState::Done => None,
    }
}
