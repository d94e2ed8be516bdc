//! Send-side session engine: signalling client (C5), peer channel (C6),
//! and session orchestration (C9) for the LAN file sharer.

pub mod channel;
pub mod client;
pub mod session;

pub use channel::{CandidateSink, PeerChannel, DATA_CHANNEL_LABEL};
pub use client::{ask, post_candidate, AskOutcome};
pub use session::{ChannelSubscriber, SenderEvent, SenderSession, SenderSubscriber};
