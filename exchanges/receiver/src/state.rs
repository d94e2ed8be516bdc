//! Single-slot session state manager (C4).
//!
//! At most one ask is in flight per receiver process. The slot holds the
//! offer plus four rendezvous primitives — a decision sink, an answer
//! sink, a candidate stream, and a done signal — and is torn down and
//! cleared once the done signal fires, so a later ask can reuse it.
//!
//! Every sink tolerates writes after its consumer has gone away: a closed
//! receiver on `set_answer`/`push_candidate`/`decide` is logged and
//! dropped, never propagated as an error. That is what lets late, racy
//! callbacks from the peer-connection library stay harmless.

use std::sync::Arc;

use lan_file_sharer_common::error::{Result, SessionError};
use lan_file_sharer_protocol::{IceCandidateInit, SessionDescription};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tracing::{debug, warn};

const CANDIDATE_BUFFER: usize = 64;

/// The receiver-local decision on a pending ask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Consumer-side handles returned by [`SessionSlot::prepare`].
pub struct DecisionSource {
    pub decision: oneshot::Receiver<Decision>,
}

struct Inner {
    offer: Option<SessionDescription>,
    prepared: bool,
    decision_tx: Option<oneshot::Sender<Decision>>,
    answer_tx: Option<oneshot::Sender<SessionDescription>>,
    answer_rx: Option<oneshot::Receiver<SessionDescription>>,
    candidate_tx: Option<mpsc::Sender<IceCandidateInit>>,
    candidate_rx: Option<mpsc::Receiver<IceCandidateInit>>,
    done: Arc<Notify>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            offer: None,
            prepared: false,
            decision_tx: None,
            answer_tx: None,
            answer_rx: None,
            candidate_tx: None,
            candidate_rx: None,
            done: Arc::new(Notify::new()),
        }
    }
}

/// Guards the one in-flight ask's state for the lifetime of that ask.
///
/// `SessionSlot` itself is cheap to clone (it's a handle around a mutex);
/// share one instance between the HTTP server, the peer-channel handshake
/// task, and whatever drives the UI decision.
#[derive(Clone)]
pub struct SessionSlot {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Initializes the slot with the ask's offer. Fails with
    /// [`SessionError::Busy`] if a slot is already occupied.
    pub async fn set_offer(&self, offer: SessionDescription) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.offer.is_some() {
            return Err(SessionError::Busy);
        }
        inner.offer = Some(offer);
        debug!("session slot: offer set");
        Ok(())
    }

    /// Allocates the decision/answer/candidate primitives. Must be called
    /// exactly once, after `set_offer`.
    pub async fn prepare(&self) -> Result<DecisionSource> {
        let mut inner = self.inner.lock().await;
        if inner.offer.is_none() {
            return Err(SessionError::ProtocolError(
                "prepare called before set_offer".into(),
            ));
        }
        if inner.prepared {
            return Err(SessionError::Busy);
        }

        let (decision_tx, decision_rx) = oneshot::channel();
        let (answer_tx, answer_rx) = oneshot::channel();
        let (candidate_tx, candidate_rx) = mpsc::channel(CANDIDATE_BUFFER);

        inner.decision_tx = Some(decision_tx);
        inner.answer_tx = Some(answer_tx);
        inner.answer_rx = Some(answer_rx);
        inner.candidate_tx = Some(candidate_tx);
        inner.candidate_rx = Some(candidate_rx);
        inner.prepared = true;

        debug!("session slot: prepared");
        Ok(DecisionSource {
            decision: decision_rx,
        })
    }

    pub async fn get_offer(&self) -> Result<SessionDescription> {
        self.inner
            .lock()
            .await
            .offer
            .clone()
            .ok_or(SessionError::ProtocolError("no offer in slot".into()))
    }

    /// Delivers the UI's accept/reject decision. A second call, or a call
    /// after the consumer has gone away, is a logged no-op.
    pub async fn decide(&self, decision: Decision) {
        let tx = self.inner.lock().await.decision_tx.take();
        match tx {
            Some(tx) => {
                if tx.send(decision).is_err() {
                    warn!("session slot: decision dropped, no consumer");
                }
            }
            None => warn!("session slot: decide called twice, ignoring"),
        }
    }

    /// Delivers the answer exactly once; later deliveries are dropped
    /// silently to tolerate late racy callbacks.
    pub async fn set_answer(&self, answer: SessionDescription) {
        let tx = self.inner.lock().await.answer_tx.take();
        match tx {
            Some(tx) => {
                if tx.send(answer).is_err() {
                    warn!("session slot: answer dropped, no consumer");
                }
            }
            None => debug!("session slot: answer already delivered, ignoring"),
        }
    }

    /// Appends one trickled ICE candidate. A full or closed stream is
    /// logged and dropped, never surfaced as an error to the caller.
    pub async fn push_candidate(&self, candidate: IceCandidateInit) {
        let tx = self.inner.lock().await.candidate_tx.clone();
        match tx {
            Some(tx) => {
                if tx.send(candidate).await.is_err() {
                    warn!("session slot: candidate dropped, stream closed");
                }
            }
            None => warn!("session slot: candidate pushed with no active slot"),
        }
    }

    /// Signals that no further candidates will be produced.
    pub async fn close_candidate_stream(&self) {
        self.inner.lock().await.candidate_tx.take();
        debug!("session slot: candidate stream closed");
    }

    /// Takes the answer consumer source. Returns an already-closed
    /// receiver if no slot is prepared or the source was already taken.
    pub async fn take_answer_source(&self) -> oneshot::Receiver<SessionDescription> {
        let rx = self.inner.lock().await.answer_rx.take();
        match rx {
            Some(rx) => rx,
            None => closed_oneshot(),
        }
    }

    /// Takes the candidate consumer source. Returns an already-closed
    /// receiver if no slot is prepared or the source was already taken.
    pub async fn take_candidate_source(&self) -> mpsc::Receiver<IceCandidateInit> {
        let rx = self.inner.lock().await.candidate_rx.take();
        match rx {
            Some(rx) => rx,
            None => {
                let (_tx, rx) = mpsc::channel(1);
                rx
            }
        }
    }

    /// A clone of the done-signal, for tasks that need to select on session
    /// teardown alongside their own work.
    pub async fn done_signal(&self) -> Arc<Notify> {
        self.inner.lock().await.done.clone()
    }

    /// Fires the done signal and clears the slot so a new ask can begin.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.done.notify_waiters();
        *inner = Inner::default();
        debug!("session slot: closed and cleared");
    }
}

fn closed_oneshot<T>() -> oneshot::Receiver<T> {
    let (tx, rx) = oneshot::channel();
    drop(tx);
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_offer() -> SessionDescription {
        SessionDescription {
            kind: lan_file_sharer_protocol::SdpKind::Offer,
            sdp: "v=0...".into(),
        }
    }

    #[tokio::test]
    async fn set_offer_twice_is_busy() {
        let slot = SessionSlot::new();
        slot.set_offer(sample_offer()).await.unwrap();
        assert!(matches!(
            slot.set_offer(sample_offer()).await,
            Err(SessionError::Busy)
        ));
    }

    #[tokio::test]
    async fn prepare_before_offer_is_protocol_error() {
        let slot = SessionSlot::new();
        assert!(matches!(
            slot.prepare().await,
            Err(SessionError::ProtocolError(_))
        ));
    }

    #[tokio::test]
    async fn decision_delivered_before_answer() {
        let slot = SessionSlot::new();
        slot.set_offer(sample_offer()).await.unwrap();
        let decision_source = slot.prepare().await.unwrap();

        slot.decide(Decision::Accept).await;
        let decision = decision_source.decision.await.unwrap();
        assert_eq!(decision, Decision::Accept);
    }

    #[tokio::test]
    async fn answer_delivered_once_then_silently_dropped() {
        let slot = SessionSlot::new();
        slot.set_offer(sample_offer()).await.unwrap();
        slot.prepare().await.unwrap();

        let mut answer_source = slot.take_answer_source().await;
        slot.set_answer(sample_offer()).await;
        let received = answer_source.try_recv();
        assert!(received.is_ok());

        // Second delivery after consumption is a no-op, not a panic.
        slot.set_answer(sample_offer()).await;
    }

    #[tokio::test]
    async fn candidates_stream_in_order_until_closed() {
        let slot = SessionSlot::new();
        slot.set_offer(sample_offer()).await.unwrap();
        slot.prepare().await.unwrap();

        let mut source = slot.take_candidate_source().await;
        for i in 0..3 {
            slot.push_candidate(IceCandidateInit {
                candidate: format!("candidate:{i}"),
                sdp_mid: None,
                sdp_mline_index: None,
            })
            .await;
        }
        slot.close_candidate_stream().await;

        let mut seen = Vec::new();
        while let Some(c) = source.recv().await {
            seen.push(c.candidate);
        }
        assert_eq!(seen, vec!["candidate:0", "candidate:1", "candidate:2"]);
    }

    #[tokio::test]
    async fn second_slot_after_close_succeeds() {
        let slot = SessionSlot::new();
        slot.set_offer(sample_offer()).await.unwrap();
        slot.prepare().await.unwrap();
        slot.close().await;

        slot.set_offer(sample_offer()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_slot_sources_are_already_closed() {
        let slot = SessionSlot::new();
        let answer_source = slot.take_answer_source().await;
        assert!(answer_source.await.is_err());

        let mut candidate_source = slot.take_candidate_source().await;
        assert!(candidate_source.recv().await.is_none());
    }
}
