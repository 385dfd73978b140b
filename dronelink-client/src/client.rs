//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use dronelink_protocol::{Inbound, Outbound};

/// Result of a submitted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub identity: String,
    pub description: String,
}

/// Client for a single drone agent.
pub struct DroneClient {
    conn: Connection,
    identity: Option<String>,
    credential: Option<String>,
}

impl DroneClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Connection::new(config),
            identity: None,
            credential: None,
        }
    }

    /// Connects to `url` with default timeouts.
    pub async fn connect(url: impl Into<String>) -> Result<Self, ClientError> {
        let mut client = Self::new(ConnectionConfig::new(url));
        client.conn.connect().await?;
        Ok(client)
    }

    /// Opens the underlying connection.
    pub async fn open(&mut self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Returns the identity this client logged in as.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Returns the credential issued at login.
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Performs the handshake and returns the issued credential.
    pub async fn login(&mut self, identity: &str, secret: &str) -> Result<String, ClientError> {
        self.conn.send(&Inbound::login(identity, secret)).await?;

        match self.conn.recv().await? {
            Outbound::Credential(token) => {
                tracing::info!("Logged in as {}", identity);
                self.identity = Some(identity.to_string());
                self.credential = Some(token.clone());
                Ok(token)
            }
            other => Err(self.rejection(other)),
        }
    }

    /// Submits a command and waits for its status update.
    pub async fn send_command(&mut self, name: &str) -> Result<StatusUpdate, ClientError> {
        self.conn.send(&Inbound::command(name)).await?;

        match self.recv().await? {
            Outbound::StatusUpdate {
                identity,
                description,
            } => Ok(StatusUpdate {
                identity,
                description,
            }),
            other => Err(self.rejection(other)),
        }
    }

    /// Sends raw text. Useful for exercising the coordinator's grammar.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), ClientError> {
        self.conn.send_text(text).await
    }

    /// Waits for the next coordinator frame.
    ///
    /// Once logged in, status updates are split after this client's identity.
    pub async fn recv(&mut self) -> Result<Outbound, ClientError> {
        match self.identity.as_deref() {
            Some(identity) => self.conn.recv_for(identity).await,
            None => self.conn.recv().await,
        }
    }

    /// Closes the connection.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.identity = None;
        self.credential = None;
        self.conn.close().await
    }

    fn rejection(&mut self, reply: Outbound) -> ClientError {
        if reply.is_terminal() {
            self.identity = None;
            self.credential = None;
        }
        match reply {
            Outbound::AlreadyConnected => ClientError::AlreadyConnected,
            Outbound::AuthenticationFailed => ClientError::AuthenticationFailed,
            Outbound::SessionExpired => ClientError::SessionExpired,
            Outbound::UnknownRequest => ClientError::UnknownRequest,
            other => ClientError::UnexpectedReply(other.to_string()),
        }
    }
}
