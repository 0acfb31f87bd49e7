//! Client error types.

use std::time::Duration;

/// A connection attempt or an open link failed.
///
/// These never reach callers of the public API as `Err`; the driver turns
/// them into [`ConnectionEvent::Error`](crate::ConnectionEvent) and retries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Handshake(err.to_string())
    }
}
