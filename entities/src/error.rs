use thiserror::Error;

/// Errors produced while building, signing, or verifying a file manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to generate signing key: {0}")]
    KeyGeneration(String),

    #[error("failed to sign manifest: {0}")]
    Signing(String),

    #[error("manifest signature verification failed")]
    Invalid,

    #[error("malformed public key: {0}")]
    MalformedKey(String),

    #[error("failed to canonically encode file list: {0}")]
    Encoding(#[from] postcard::Error),
}

pub type Result<T> = std::result::Result<T, ManifestError>;
