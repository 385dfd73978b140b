//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] dronelink_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("drone already connected")]
    AlreadyConnected,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("session expired")]
    SessionExpired,

    #[error("request not accepted in the current state")]
    UnknownRequest,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    ///
    /// A retry always needs a fresh connection; the coordinator closes the
    /// socket after an expired session. `AlreadyConnected` is not retryable:
    /// the identity stays taken until its holder disconnects.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Timeout
                | ClientError::ConnectionClosed
                | ClientError::SessionExpired
        )
    }
}
