//! Server error types.

use crate::auth::TokenError;
use crate::config::ConfigError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("credential error: {0}")]
    Token(#[from] TokenError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns a short label used for the errors metric.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::Io(_) => "io",
            ServerError::WebSocket(_) => "websocket",
            ServerError::Token(_) => "token",
            ServerError::Config(_) => "config",
            ServerError::Metrics(_) => "metrics",
            ServerError::ShuttingDown => "shutdown",
        }
    }

    /// Returns whether the error is an ordinary peer disconnect.
    pub fn is_disconnect(&self) -> bool {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match self {
            ServerError::WebSocket(WsError::ConnectionClosed | WsError::AlreadyClosed) => true,
            ServerError::WebSocket(WsError::Protocol(_)) => true,
            ServerError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
