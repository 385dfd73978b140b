//! Protocol error types.

use thiserror::Error;

/// Reasons a frame does not match the wire grammar.
///
/// These never reach the peer verbatim; the coordinator collapses all of
/// them into the generic unknown-request reply and keeps the detail for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unrecognized frame prefix")]
    UnknownPrefix,

    #[error("login frame has no ',' between identity and secret")]
    MissingSecret,

    #[error("login frame has an empty identity")]
    EmptyIdentity,

    #[error("binary frames are not part of the protocol")]
    BinaryFrame,

    #[error("malformed status update: {0}")]
    MalformedStatus(String),
}
