//! Error types for the collection pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while collecting posts.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed frame, commit or block bundle.
    #[error("decode error: {0}")]
    Decode(#[from] skyscrape_core::Error),

    /// DID could not be resolved to an identity.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// HTTP error talking to an identity service.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Firehose connection failed or was lost.
    #[error("transport error: {0}")]
    Transport(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error (output file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// How an error is handled by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Skip the event and continue.
    Decode,
    /// Fall back to the raw DID and continue.
    Resolution,
    /// Reconnect with backoff; fatal once retries are exhausted.
    Transport,
    /// Fatal immediately.
    Io,
}

impl Error {
    /// Classify this error for the session's retry/skip/abort policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Decode(_) => ErrorKind::Decode,
            Error::Resolution(_) | Error::Http(_) => ErrorKind::Resolution,
            Error::Transport(_) | Error::WebSocket(_) => ErrorKind::Transport,
            Error::Io(_) | Error::Json(_) | Error::Config(_) => ErrorKind::Io,
        }
    }

    /// Whether the session may reconnect after this error.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}
