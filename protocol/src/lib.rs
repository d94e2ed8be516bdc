//! Wire types shared by the signalling HTTP layer (C5) and the chunked
//! peer data-channel protocol (C7). Neither the sender nor the receiver
//! exchange crate depends on the other; they only share these types.

pub mod chunk;
pub mod signalling;

pub use chunk::{Chunk, DataChannelMessage, DEFAULT_CHUNK_SIZE};
pub use signalling::{
    AnswerStreamEvent, AskEvent, AskRequest, ErrorBody, IceCandidateInit, SdpKind,
    SessionDescription,
};
