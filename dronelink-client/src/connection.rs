//! Connection management.

use crate::error::ClientError;
use dronelink_protocol::{Inbound, Outbound, ProtocolError};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Coordinator URL, e.g. `ws://127.0.0.1:8765`.
    pub url: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Time to wait for a reply frame.
    pub request_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// A WebSocket connection to a coordinator.
pub struct Connection {
    config: ConnectionConfig,
    ws: Option<WsStream>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, ws: None }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the coordinator.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        tracing::debug!("Connecting to {}...", self.config.url);

        let (ws, _response) = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::WebSocket(e)
        })?;

        tracing::debug!("Connected to {}", self.config.url);
        self.ws = Some(ws);
        Ok(())
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.ws.is_some()
    }

    /// Sends a protocol frame.
    pub async fn send(&mut self, frame: &Inbound) -> Result<(), ClientError> {
        self.send_text(&frame.to_string()).await
    }

    /// Sends raw text, bypassing the frame types.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        let ws = self.ws.as_mut().ok_or(ClientError::NotConnected)?;
        tracing::debug!("Sending: {}", text);
        ws.send(Message::text(text)).await?;
        Ok(())
    }

    /// Waits for the next coordinator frame.
    pub async fn recv(&mut self) -> Result<Outbound, ClientError> {
        let text = self.recv_text().await?;
        Ok(Outbound::parse(&text)?)
    }

    /// Waits for the next coordinator frame addressed to `identity`.
    pub async fn recv_for(&mut self, identity: &str) -> Result<Outbound, ClientError> {
        let text = self.recv_text().await?;
        Ok(Outbound::parse_for(&text, identity)?)
    }

    /// Waits for the next text frame and returns it unparsed.
    pub async fn recv_text(&mut self) -> Result<String, ClientError> {
        let timeout = self.config.request_timeout;
        let ws = self.ws.as_mut().ok_or(ClientError::NotConnected)?;

        let result = tokio::time::timeout(timeout, async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_string()),
                    Some(Ok(Message::Binary(_))) => {
                        return Err(ClientError::Protocol(ProtocolError::BinaryFrame))
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(ClientError::ConnectionClosed),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(ClientError::WebSocket(e)),
                }
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)?;

        if matches!(result, Err(ClientError::ConnectionClosed)) {
            self.ws = None;
        }
        if let Ok(ref text) = result {
            tracing::debug!("Received: {}", text);
        }
        result
    }

    /// Closes the connection.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        if let Some(mut ws) = self.ws.take() {
            match ws.close(None).await {
                Ok(()) => {}
                Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
                | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
