use thiserror::Error;

/// The error taxonomy shared by every session-engine component.
///
/// Each variant corresponds to one of the failure categories the
/// specification calls out: some are recoverable and only ever logged
/// (`Busy`, stale-candidate `ProtocolError`s), others end the current
/// session but leave the process running for the next one.
#[derive(Debug, Error, Clone)]
pub enum SessionError {
    /// A second concurrent operation was attempted. Never fatal; surfaced
    /// as HTTP 503 or a "already in progress" UI message.
    #[error("system is busy")]
    Busy,

    /// The signed manifest failed signature verification. Fatal for this
    /// ask; surfaced as HTTP 400. Never retried automatically.
    #[error("manifest signature is invalid")]
    ManifestInvalid,

    /// A chunk's sanitized file name would land outside the configured
    /// output directory.
    #[error("file name `{0}` escapes the output directory")]
    PathEscape(String),

    /// A malformed chunk or signalling payload was received.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The peer connection did not reach the Connected state before the
    /// handshake timeout.
    #[error("peer handshake failed: {0}")]
    HandshakeFailed(String),

    /// A completed file's digest did not match the advertised hash.
    #[error("hash mismatch for file `{0}`")]
    HashMismatch(String),

    /// An HTTP or network-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation was cancelled via an external cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The mDNS/DNS-SD layer failed to announce or browse.
    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
