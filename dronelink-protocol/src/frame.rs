//! Inbound requests and outbound replies.

use crate::error::ProtocolError;
use crate::{COMMAND_PREFIX, JWT_PREFIX, LOGIN_PREFIX, STATUS_UPDATE_PREFIX};
use std::fmt;

const ALREADY_CONNECTED: &str = "ERROR: Drone already connected.";
const UNKNOWN_REQUEST: &str = "ERROR: Unknown command.";
const AUTHENTICATION_FAILED: &str = "ERROR: Authentication failed.";
const SESSION_EXPIRED: &str = "ERROR: Session expired.";

/// A frame sent by an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `LOGIN:<identity>,<secret>`
    Login { identity: String, secret: String },
    /// `COMMAND:<name>`
    Command { name: String },
}

impl Inbound {
    pub fn login(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Inbound::Login {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    pub fn command(name: impl Into<String>) -> Self {
        Inbound::Command { name: name.into() }
    }

    /// Parses a text frame.
    ///
    /// The login payload is split at the first comma, so secrets may contain
    /// commas. The command name ends at the next `:` and is trimmed; it is
    /// not checked against the action table here.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        if let Some(payload) = text.strip_prefix(LOGIN_PREFIX) {
            let (identity, secret) = payload
                .split_once(',')
                .ok_or(ProtocolError::MissingSecret)?;
            let identity = identity.trim();
            if identity.is_empty() {
                return Err(ProtocolError::EmptyIdentity);
            }
            return Ok(Inbound::login(identity, secret));
        }

        if let Some(payload) = text.strip_prefix(COMMAND_PREFIX) {
            let name = payload.split(':').next().unwrap_or_default().trim();
            return Ok(Inbound::command(name));
        }

        Err(ProtocolError::UnknownPrefix)
    }
}

impl fmt::Display for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inbound::Login { identity, secret } => {
                write!(f, "{}{},{}", LOGIN_PREFIX, identity, secret)
            }
            Inbound::Command { name } => write!(f, "{}{}", COMMAND_PREFIX, name),
        }
    }
}

/// A frame sent by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Handshake accepted; carries the signed credential.
    Credential(String),
    /// Handshake rejected because the identity already holds a session.
    AlreadyConnected,
    /// Result of a command, known or unknown.
    StatusUpdate {
        identity: String,
        description: String,
    },
    /// The frame did not match the grammar expected in the current state.
    UnknownRequest,
    /// The login secret was rejected.
    AuthenticationFailed,
    /// The session credential lapsed while the connection was open.
    SessionExpired,
}

impl Outbound {
    pub fn status(identity: impl Into<String>, description: impl Into<String>) -> Self {
        Outbound::StatusUpdate {
            identity: identity.into(),
            description: description.into(),
        }
    }

    /// Returns whether this reply ends the connection.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outbound::AlreadyConnected | Outbound::AuthenticationFailed | Outbound::SessionExpired
        )
    }

    /// Parses a coordinator reply (client side).
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        match text {
            ALREADY_CONNECTED => return Ok(Outbound::AlreadyConnected),
            UNKNOWN_REQUEST => return Ok(Outbound::UnknownRequest),
            AUTHENTICATION_FAILED => return Ok(Outbound::AuthenticationFailed),
            SESSION_EXPIRED => return Ok(Outbound::SessionExpired),
            _ => {}
        }

        if let Some(token) = text.strip_prefix(JWT_PREFIX) {
            return Ok(Outbound::Credential(token.to_string()));
        }

        if let Some(rest) = text.strip_prefix(STATUS_UPDATE_PREFIX) {
            let (identity, description) = rest
                .split_once(": ")
                .ok_or_else(|| ProtocolError::MalformedStatus(text.to_string()))?;
            return Ok(Outbound::status(identity, description));
        }

        Err(ProtocolError::UnknownPrefix)
    }

    /// Parses a coordinator reply addressed to `identity`.
    ///
    /// Identities may themselves contain `": "`, so a status update is split
    /// after the known identity rather than at the first separator.
    pub fn parse_for(text: &str, identity: &str) -> Result<Self, ProtocolError> {
        let description = text
            .strip_prefix(STATUS_UPDATE_PREFIX)
            .and_then(|rest| rest.strip_prefix(identity))
            .and_then(|rest| rest.strip_prefix(": "));

        match description {
            Some(description) => Ok(Outbound::status(identity, description)),
            None => Outbound::parse(text),
        }
    }
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outbound::Credential(token) => write!(f, "{}{}", JWT_PREFIX, token),
            Outbound::AlreadyConnected => f.write_str(ALREADY_CONNECTED),
            Outbound::StatusUpdate {
                identity,
                description,
            } => write!(f, "{}{}: {}", STATUS_UPDATE_PREFIX, identity, description),
            Outbound::UnknownRequest => f.write_str(UNKNOWN_REQUEST),
            Outbound::AuthenticationFailed => f.write_str(AUTHENTICATION_FAILED),
            Outbound::SessionExpired => f.write_str(SESSION_EXPIRED),
        }
    }
}
