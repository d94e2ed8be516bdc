//! Sender session orchestrator (C9).
//!
//! Runs the eight steps of one transfer end to end: build + sign the
//! manifest, post the ask, drive the ICE/offer-answer round trip, wait for
//! the data channel to open, then stream every file's chunks in manifest
//! order. A `JoinSet` tracks every in-flight per-file task so a cancelled
//! run drains cleanly instead of leaving orphaned background work.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};

use lan_file_sharer_common::{
    error::{Result, SessionError},
    ConcurrencyGuard,
};
use lan_file_sharer_entities::{build_manifest, leaves, sign, FileNode, ServiceRecord};
use lan_file_sharer_protocol::{Chunk, DataChannelMessage, DEFAULT_CHUNK_SIZE};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    channel::{CandidateSink, PeerChannel},
    client::{self, AskOutcome},
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// Progress and lifecycle events a caller (the CLI) can subscribe to.
#[derive(Clone, Debug)]
pub enum SenderEvent {
    TransferStarted { file_count: usize, total_bytes: u64 },
    FileSent { relative_path: String },
    TransferComplete,
    Rejected,
    Error(String),
}

pub trait SenderSubscriber: Send + Sync {
    fn notify(&self, event: SenderEvent);
}

/// Forwards every event to an `mpsc::Sender`, used by the CLI to drive its
/// progress bar without implementing the trait itself.
pub struct ChannelSubscriber(pub mpsc::Sender<SenderEvent>);
impl SenderSubscriber for ChannelSubscriber {
    fn notify(&self, event: SenderEvent) {
        if self.0.try_send(event).is_err() {
            debug!("sender event dropped, no receiver listening");
        }
    }
}

struct QueuedCandidates {
    client: reqwest::Client,
    base_url: String,
}

impl CandidateSink for QueuedCandidates {
    fn on_local_candidate(&self, candidate: lan_file_sharer_protocol::IceCandidateInit) {
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        tokio::spawn(async move {
            if let Err(e) = client::post_candidate(&client, &base_url, &candidate).await {
                warn!(error = %e, "failed to post local ice candidate");
            }
        });
    }
}

/// Orchestrates one sender-side transfer.
#[derive(Clone)]
pub struct SenderSession {
    guard: ConcurrencyGuard,
    http: reqwest::Client,
    subscribers: Arc<RwLock<HashMap<String, Arc<dyn SenderSubscriber>>>>,
}

/// Builds an HTTP client that stamps every outgoing signalling request with
/// an `X-Service-ID` header identifying this sender process, per the wire
/// contract (§6). Falls back to a client without the header if the header
/// value is somehow not constructible (it always is, for a UUID).
fn http_client_with_service_id() -> reqwest::Client {
    let service_id = uuid::Uuid::new_v4().to_string();
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(value) = reqwest::header::HeaderValue::from_str(&service_id) {
        headers.insert("X-Service-ID", value);
    }
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

impl SenderSession {
    pub fn new() -> Self {
        Self {
            guard: ConcurrencyGuard::new(),
            http: http_client_with_service_id(),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self, id: impl Into<String>, subscriber: Arc<dyn SenderSubscriber>) {
        self.subscribers.write().unwrap().insert(id.into(), subscriber);
    }

    pub fn unsubscribe(&self, id: &str) {
        self.subscribers.write().unwrap().remove(id);
    }

    fn notify(&self, event: SenderEvent) {
        for subscriber in self.subscribers.read().unwrap().values() {
            subscriber.notify(event.clone());
        }
    }

    /// Sends `paths` to `peer`, running to completion, rejection, or
    /// cancellation. At most one transfer runs per `SenderSession`.
    pub async fn run(
        &self,
        peer: &ServiceRecord,
        paths: &[PathBuf],
        cancel: CancellationToken,
    ) -> Result<()> {
        let guard = self.guard.clone();
        let this = self.clone();
        let peer = peer.clone();
        let paths = paths.to_vec();
        guard
            .execute_with_cancel(&cancel, move || this.run_inner(peer, paths, cancel.clone()))
            .await?
    }

    async fn run_inner(
        &self,
        peer: ServiceRecord,
        paths: Vec<PathBuf>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let roots = source_roots(&paths);
        let files = build_manifest(&paths).map_err(|e| SessionError::ProtocolError(e.to_string()))?;
        let total_bytes = lan_file_sharer_entities::total_size(&files);
        let file_count = leaves(&files).len();
        self.notify(SenderEvent::TransferStarted { file_count, total_bytes });

        let signed = sign(files.clone()).map_err(|e| SessionError::ProtocolError(e.to_string()))?;
        let base_url = peer.base_url();

        let candidate_sink = Arc::new(QueuedCandidates {
            client: self.http.clone(),
            base_url: base_url.clone(),
        });
        let (peer_channel, offer) = PeerChannel::create_offer(Vec::new(), candidate_sink).await?;
        let peer_channel = Arc::new(peer_channel);

        let outcome = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            client::ask(&self.http, &base_url, signed, offer),
        )
        .await
        .map_err(|_| SessionError::HandshakeFailed("ask timed out".into()))??;

        let (answer, mut candidates) = match outcome {
            AskOutcome::Rejected => {
                peer_channel.close().await;
                self.notify(SenderEvent::Rejected);
                return Ok(());
            }
            AskOutcome::Accepted { answer, candidates } => (answer, candidates),
        };

        peer_channel.set_remote_answer(answer).await?;

        let candidate_pump = {
            let peer_channel = peer_channel.clone();
            tokio::spawn(async move {
                while let Some(candidate) = candidates.recv().await {
                    if let Err(e) = peer_channel.add_ice_candidate(candidate).await {
                        warn!(error = %e, "failed to apply trickled remote candidate");
                    }
                }
            })
        };

        let open_result = tokio::time::timeout(HANDSHAKE_TIMEOUT, peer_channel.wait_open(&cancel))
            .await
            .map_err(|_| SessionError::HandshakeFailed("data channel did not open in time".into()));

        let result = match open_result {
            Ok(Ok(())) => {
                info!("data channel open, streaming files");
                tokio::time::timeout(
                    TRANSFER_TIMEOUT,
                    self.stream_all_files(peer_channel.clone(), &files, &roots, &cancel),
                )
                .await
                .map_err(|_| SessionError::HandshakeFailed("transfer timed out".into()))
                .and_then(|r| r)
            }
            Ok(Err(e)) => Err(e),
            Err(e) => Err(e),
        };

        candidate_pump.abort();
        peer_channel.close().await;

        match &result {
            Ok(()) => self.notify(SenderEvent::TransferComplete),
            Err(e) => self.notify(SenderEvent::Error(e.to_string())),
        }
        result
    }

    async fn stream_all_files(
        &self,
        channel: Arc<PeerChannel>,
        files: &[FileNode],
        roots: &HashMap<String, PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut join_set: JoinSet<Result<String>> = JoinSet::new();

        for node in leaves(files) {
            let node = node.clone();
            let channel = channel.clone();
            let cancel = cancel.clone();
            let source = resolve_source_path(roots, &node.relative_path);
            join_set.spawn(async move {
                send_file(&channel, &node, &source, &cancel)
                    .await
                    .map(|_| node.relative_path)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(relative_path)) => self.notify(SenderEvent::FileSent { relative_path }),
                Ok(Err(e)) => {
                    error!(error = %e, "file transfer task failed");
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    return Err(e);
                }
                Err(join_err) => {
                    error!(error = %join_err, "file transfer task panicked or was cancelled");
                }
            }
        }

        channel
            .send(
                DataChannelMessage::TransferComplete
                    .to_bytes()
                    .map_err(|e| SessionError::ProtocolError(e.to_string()))?,
            )
            .await
    }
}

impl Default for SenderSession {
    fn default() -> Self {
        Self::new()
    }
}

async fn send_file(channel: &PeerChannel, node: &FileNode, source: &Path, cancel: &CancellationToken) -> Result<()> {
    let data = tokio::fs::read(source)
        .await
        .map_err(|e| SessionError::Transport(format!("reading {}: {e}", source.display())))?;

    for (seq, piece) in data.chunks(DEFAULT_CHUNK_SIZE).enumerate() {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        let chunk = Chunk {
            file_id: node.relative_path.clone(),
            file_name: node.relative_path.clone(),
            sequence_no: seq as u64 + 1,
            offset: (seq * DEFAULT_CHUNK_SIZE) as u64,
            data: piece.to_vec(),
            total_size: node.size,
            expected_sha256_hex: node.sha256_hex.clone(),
        };
        let bytes = DataChannelMessage::Chunk(chunk)
            .to_bytes()
            .map_err(|e| SessionError::ProtocolError(e.to_string()))?;
        channel.send(bytes).await?;
    }
    Ok(())
}

/// Maps each top-level manifest root name (the first path component of any
/// `relative_path` under it) back to the parent directory `build_manifest`
/// implicitly measured it from, so a leaf's `relative_path` can be resolved
/// back to a real filesystem path for reading.
fn source_roots(paths: &[PathBuf]) -> HashMap<String, PathBuf> {
    let mut roots = HashMap::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        roots.insert(name, parent);
    }
    roots
}

fn resolve_source_path(roots: &HashMap<String, PathBuf>, relative_path: &str) -> PathBuf {
    let root_name = relative_path.split('/').next().unwrap_or(relative_path);
    match roots.get(root_name) {
        Some(parent) => parent.join(relative_path),
        None => PathBuf::from(relative_path),
    }
}
