//! The chunk envelope exchanged over the peer data channel (C6/C7).
//!
//! Chunks arrive in arbitrary order over an unordered/unreliable-ish data
//! channel, so every chunk carries enough of the file's identity and
//! position to be placed correctly on its own.

use serde::{Deserialize, Serialize};

/// One unit of a file transfer, carried as a single data-channel message.
///
/// `sequence_no` is monotonic per file, starting at 1, and is used only for
/// duplicate detection and logging; `offset` is the authoritative byte
/// position the payload starts at. The two aren't derivable from each other
/// since the last chunk of a file is usually shorter than the rest, so both
/// are sent explicitly and the receiver never assumes a fixed chunk size.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub file_id: String,
    pub file_name: String,
    pub sequence_no: u64,
    pub offset: u64,
    pub data: Vec<u8>,
    pub total_size: u64,
    pub expected_sha256_hex: String,
}

/// Target chunk payload size in bytes, chosen to stay under typical WebRTC
/// SCTP fragmentation thresholds (§4.7's ~1,400-byte MTU target).
pub const DEFAULT_CHUNK_SIZE: usize = 1_400;

/// Control messages multiplexed onto the same data channel as chunks, so a
/// single channel can carry both file content and completion signalling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataChannelMessage {
    Chunk(Chunk),
    /// Sent once, after the sender has pushed every chunk of every file.
    TransferComplete,
}

impl DataChannelMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_round_trips_through_json() {
        let msg = DataChannelMessage::Chunk(Chunk {
            file_id: "f1".into(),
            file_name: "notes.txt".into(),
            sequence_no: 4,
            offset: 3 * DEFAULT_CHUNK_SIZE as u64,
            data: vec![1, 2, 3, 4],
            total_size: 1_000_000,
            expected_sha256_hex: "deadbeef".into(),
        });

        let bytes = msg.to_bytes().unwrap();
        let decoded = DataChannelMessage::from_bytes(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn transfer_complete_round_trips() {
        let msg = DataChannelMessage::TransferComplete;
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(DataChannelMessage::from_bytes(&bytes).unwrap(), msg);
    }
}
