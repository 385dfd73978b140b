//! # dronelink-protocol
//!
//! Wire protocol for dronelink.
//!
//! Every message is a single UTF-8 text frame. Agents send `LOGIN:` and
//! `COMMAND:` frames; the coordinator answers with `JWT:`, `STATUS_UPDATE:`
//! or one of the fixed `ERROR:` frames.
//!
//! This crate provides:
//! - Parsing of inbound frames into [`Inbound`]
//! - Rendering and parsing of coordinator replies ([`Outbound`])
//! - Protocol error types and constants

pub mod error;
pub mod frame;

pub use error::ProtocolError;
pub use frame::{Inbound, Outbound};

/// Prefix of a handshake request.
pub const LOGIN_PREFIX: &str = "LOGIN:";

/// Prefix of a command request.
pub const COMMAND_PREFIX: &str = "COMMAND:";

/// Prefix of a handshake acceptance carrying the credential.
pub const JWT_PREFIX: &str = "JWT:";

/// Prefix of a command result.
pub const STATUS_UPDATE_PREFIX: &str = "STATUS_UPDATE: ";

/// Default port for the dronelink coordinator.
pub const DEFAULT_PORT: u16 = 8765;
