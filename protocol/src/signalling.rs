//! Wire types for the HTTP signalling rendezvous (C5): the `/ask` request,
//! the SSE events streamed back from `/ask` and `/answer-stream`, and the
//! `/candidate` post body.
//!
//! The offer is carried inline in `/ask` (no separate `/offer` endpoint,
//! per the resolved offer-placement question), so a single `AskRequest`
//! shape covers the whole handshake kickoff.

use lan_file_sharer_entities::FileNode;
use serde::{Deserialize, Serialize};

/// Body of `POST /ask`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AskRequest {
    pub files: Vec<FileNode>,
    #[serde(rename = "publicKey")]
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub offer: SessionDescription,
}

/// A WebRTC session description (offer or answer), carried as plain SDP
/// text tagged with its kind so either side can hand it directly to the
/// peer-connection library.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A single trickled ICE candidate, as produced by the peer-connection
/// library's `on_ice_candidate` callback and forwarded verbatim over the
/// wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// One SSE event emitted from `/ask` or `/answer-stream`.
///
/// Serialized as the `data:` payload of an SSE frame; the SSE `event:`
/// line (when present) is derived from the variant name by the server
/// and parsed back into this enum by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AskEvent {
    Accepted { answer: SessionDescription },
    Rejected,
}

/// One event on the `/answer-stream`, distinguished by the SSE `event:`
/// field rather than a JSON tag (the server writes `event: answer` /
/// `event: candidate` lines directly).
#[derive(Clone, Debug, PartialEq)]
pub enum AnswerStreamEvent {
    Answer(SessionDescription),
    Candidate(IceCandidateInit),
}

impl AnswerStreamEvent {
    /// The literal SSE `event:` field name this variant is written under.
    pub fn event_name(&self) -> &'static str {
        match self {
            AnswerStreamEvent::Answer(_) => "answer",
            AnswerStreamEvent::Candidate(_) => "candidate",
        }
    }

    /// The JSON payload written as this event's `data:` field.
    pub fn data_json(&self) -> Result<String, serde_json::Error> {
        match self {
            AnswerStreamEvent::Answer(sdp) => serde_json::to_string(sdp),
            AnswerStreamEvent::Candidate(c) => serde_json::to_string(c),
        }
    }

    /// Parse a `(event, data)` pair as read off the wire back into an
    /// `AnswerStreamEvent`.
    pub fn parse(event: &str, data: &str) -> Result<Self, serde_json::Error> {
        match event {
            "answer" => Ok(AnswerStreamEvent::Answer(serde_json::from_str(data)?)),
            "candidate" => Ok(AnswerStreamEvent::Candidate(serde_json::from_str(data)?)),
            other => Err(serde::de::Error::custom(format!(
                "unrecognized SSE event `{other}`"
            ))),
        }
    }
}

/// Body returned for any non-2xx signalling response, e.g. 503 busy or 400
/// malformed/invalid signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_event_accepted_round_trips() {
        let event = AskEvent::Accepted {
            answer: SessionDescription {
                kind: SdpKind::Answer,
                sdp: "v=0...".into(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: AskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn ask_event_rejected_serializes_to_status_only() {
        let json = serde_json::to_string(&AskEvent::Rejected).unwrap();
        assert_eq!(json, r#"{"status":"rejected"}"#);
    }

    #[test]
    fn answer_stream_event_round_trips_through_named_events() {
        let event = AnswerStreamEvent::Candidate(IceCandidateInit {
            candidate: "candidate:1 1 UDP 1 10.0.0.2 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        });
        let data = event.data_json().unwrap();
        let parsed = AnswerStreamEvent::parse(event.event_name(), &data).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn unrecognized_event_name_is_an_error() {
        assert!(AnswerStreamEvent::parse("bogus", "{}").is_err());
    }
}
