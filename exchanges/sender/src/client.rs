//! HTTP signalling client (C5, sender side).
//!
//! Mirrors the receiver's single long-lived `/ask` response: posting the
//! signed manifest plus offer yields either an immediate rejection or an
//! answer followed by a stream of trickled ICE candidates, parsed by hand
//! from the raw SSE byte stream (an `eventsource` crate would do the same
//! job with less code, but everything this needs is already in
//! `reqwest` + `futures-lite`).

use bytes::Bytes;
use futures_lite::StreamExt;
use lan_file_sharer_common::error::{Result, SessionError};
use lan_file_sharer_entities::SignedManifest;
use lan_file_sharer_protocol::{AnswerStreamEvent, AskEvent, IceCandidateInit, SessionDescription};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outcome of posting an ask: either the receiver rejected it, or it was
/// accepted and we got back an answer plus a channel of trickled
/// candidates that closes once the receiver finishes gathering.
pub enum AskOutcome {
    Rejected,
    Accepted {
        answer: SessionDescription,
        candidates: mpsc::Receiver<IceCandidateInit>,
    },
}

const CANDIDATE_BUFFER: usize = 64;

/// POSTs the signed manifest and offer to `{base_url}/ask` and consumes
/// the resulting SSE stream until either rejection or the candidate
/// stream closes.
pub async fn ask(
    client: &reqwest::Client,
    base_url: &str,
    manifest: SignedManifest,
    offer: SessionDescription,
) -> Result<AskOutcome> {
    let body = serde_json::json!({
        "files": manifest.files,
        "publicKey": manifest.public_key,
        "signature": manifest.signature,
        "offer": offer,
    });

    let response = client
        .post(format!("{base_url}/ask"))
        .json(&body)
        .send()
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;

    match response.status() {
        reqwest::StatusCode::SERVICE_UNAVAILABLE => return Err(SessionError::Busy),
        reqwest::StatusCode::BAD_REQUEST => return Err(SessionError::ManifestInvalid),
        status if !status.is_success() => {
            return Err(SessionError::Transport(format!("unexpected status {status}")))
        }
        _ => {}
    }

    let mut byte_stream = response.bytes_stream();
    let mut buffer = String::new();

    let first_block = loop {
        match byte_stream.next().await {
            Some(Ok(bytes)) => {
                append_bytes(&mut buffer, &bytes);
                if let Some(block) = take_block(&mut buffer) {
                    break block;
                }
            }
            Some(Err(e)) => return Err(SessionError::Transport(e.to_string())),
            None => return Err(SessionError::Transport("SSE stream closed before answer".into())),
        }
    };

    let (_event_name, data) = parse_block(&first_block)?;
    let ask_event: AskEvent =
        serde_json::from_str(&data).map_err(|e| SessionError::ProtocolError(e.to_string()))?;
    let answer = match ask_event {
        AskEvent::Rejected => {
            debug!("ask rejected by receiver");
            return Ok(AskOutcome::Rejected);
        }
        AskEvent::Accepted { answer } => answer,
    };

    let (tx, rx) = mpsc::channel(CANDIDATE_BUFFER);
    tokio::spawn(async move {
        loop {
            match byte_stream.next().await {
                Some(Ok(bytes)) => {
                    append_bytes(&mut buffer, &bytes);
                    while let Some(block) = take_block(&mut buffer) {
                        match parse_block(&block) {
                            Ok((Some(name), data)) if name == "candidate" => {
                                match AnswerStreamEvent::parse("candidate", &data) {
                                    Ok(AnswerStreamEvent::Candidate(c)) => {
                                        if tx.send(c).await.is_err() {
                                            return;
                                        }
                                    }
                                    Ok(_) | Err(_) => {
                                        warn!("skipping malformed candidate event");
                                    }
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "skipping malformed SSE block"),
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "answer-stream transport error, stopping candidate forwarding");
                    return;
                }
                None => return,
            }
        }
    });

    Ok(AskOutcome::Accepted { answer, candidates: rx })
}

/// POSTs one locally gathered ICE candidate to `{base_url}/candidate`.
pub async fn post_candidate(
    client: &reqwest::Client,
    base_url: &str,
    candidate: &IceCandidateInit,
) -> Result<()> {
    let response = client
        .post(format!("{base_url}/candidate"))
        .json(candidate)
        .send()
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;

    if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(SessionError::Busy);
    }
    if !response.status().is_success() {
        return Err(SessionError::Transport(format!(
            "candidate post failed with status {}",
            response.status()
        )));
    }
    Ok(())
}

fn append_bytes(buffer: &mut String, bytes: &Bytes) {
    buffer.push_str(&String::from_utf8_lossy(bytes));
}

/// Pops one complete SSE block (terminated by a blank line) off the front
/// of `buffer`, if one is available yet.
fn take_block(buffer: &mut String) -> Option<String> {
    let idx = buffer.find("\n\n")?;
    let block = buffer[..idx].to_string();
    *buffer = buffer[idx + 2..].to_string();
    Some(block)
}

/// Parses one SSE block's `event:`/`data:` lines. Multiple `data:` lines
/// are joined with `\n`, per the SSE spec; this server never emits more
/// than one, but we don't assume that here.
fn parse_block(block: &str) -> Result<(Option<String>, String)> {
    let mut event_name = None;
    let mut data_lines = Vec::new();

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim().to_string());
        }
    }

    if data_lines.is_empty() {
        return Err(SessionError::ProtocolError("SSE block missing data".into()));
    }

    Ok((event_name, data_lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rejected_block_with_default_event_name() {
        let (name, data) = parse_block("data: {\"status\":\"rejected\"}").unwrap();
        assert_eq!(name, None);
        assert_eq!(data, "{\"status\":\"rejected\"}");
    }

    #[test]
    fn parses_named_answer_block() {
        let (name, data) = parse_block("event: answer\ndata: {\"answer\":{}}").unwrap();
        assert_eq!(name.as_deref(), Some("answer"));
        assert_eq!(data, "{\"answer\":{}}");
    }

    #[test]
    fn take_block_splits_on_blank_line_and_drains_buffer() {
        let mut buffer = "event: answer\ndata: {}\n\nevent: candidate\ndata: {}\n\n".to_string();
        let first = take_block(&mut buffer).unwrap();
        assert!(first.starts_with("event: answer"));
        let second = take_block(&mut buffer).unwrap();
        assert!(second.starts_with("event: candidate"));
        assert!(take_block(&mut buffer).is_none());
    }
}
