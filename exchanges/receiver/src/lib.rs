//! Receive-side session engine: the signalling server (C5) wired to the
//! single-slot session state manager (C4), the peer channel (C6), and the
//! file receiver (C8).
//!
//! A full receive session is: bind and serve [`server::router`] on some
//! port, announce it over mDNS with [`lan_file_sharer_discovery::announce`],
//! wait for a [`server::PendingAsk`] on the channel returned by
//! [`ReceiverEngine::new`], show it to the user, then call
//! [`ReceiverEngine::accept`] or [`ReceiverEngine::reject`].

pub mod channel;
pub mod file_receiver;
pub mod server;
pub mod state;

use std::sync::Arc;

use lan_file_sharer_common::error::Result;
use tokio::sync::mpsc;

pub use channel::PeerChannel;
pub use file_receiver::{
    FileCompletedEvent, FileFailedEvent, FileProgressEvent, FileReceiver, FileReceiverSubscriber,
    TransferFinishedEvent,
};
pub use server::{PendingAsk, ReceiverServerState};
pub use state::{Decision, SessionSlot};

const PENDING_ASK_BUFFER: usize = 4;

/// Top-level receiver handle: owns the file receiver and the server state,
/// and exposes the accept/reject decision points the hosting application
/// drives from its UI.
pub struct ReceiverEngine {
    pub server_state: ReceiverServerState,
    pub file_receiver: Arc<FileReceiver>,
}

impl ReceiverEngine {
    /// Builds a new engine writing received files under `output_dir`, and
    /// returns it alongside the channel on which pending asks are
    /// announced.
    pub fn new(
        output_dir: impl Into<std::path::PathBuf>,
        ice_servers: Vec<String>,
    ) -> (Self, mpsc::Receiver<PendingAsk>) {
        let (tx, rx) = mpsc::channel(PENDING_ASK_BUFFER);
        let file_receiver = Arc::new(FileReceiver::new(output_dir));
        let server_state = ReceiverServerState::new(file_receiver.clone(), ice_servers, tx);
        (
            Self {
                server_state,
                file_receiver,
            },
            rx,
        )
    }

    pub async fn accept(&self) -> Result<()> {
        self.server_state.decide(Decision::Accept).await;
        Ok(())
    }

    pub async fn reject(&self) -> Result<()> {
        self.server_state.decide(Decision::Reject).await;
        Ok(())
    }

    pub fn router(&self) -> axum::Router {
        server::router(self.server_state.clone())
    }
}
