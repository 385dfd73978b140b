//! # dronelink-server
//!
//! WebSocket coordinator for dronelink.
//!
//! This crate provides:
//! - WebSocket connection handling with async I/O
//! - The per-connection LOGIN/COMMAND state machine
//! - Single-session-per-identity registry
//! - Signed, short-lived credential issuance
//! - Layered configuration and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod server;
pub mod session;

pub use auth::{Credential, SecretValidator, TokenError, TokenIssuer};
pub use config::{AuthConfig, Config, MetricsConfig, NetworkConfig, SessionConfig};
pub use error::ServerError;
pub use handler::{ConnectionHandler, ConnectionState, CoordinatorContext, Reply};
pub use metrics::Metrics;
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{ConnectionHandle, Session, SessionConflict, SessionGuard, SessionRegistry};
