//! # dronelink-client
//!
//! Client library for dronelink.
//!
//! This crate provides:
//! - Async WebSocket connection to a coordinator
//! - High-level API for the LOGIN handshake and COMMAND submission
//! - Typed coordinator replies

pub mod client;
pub mod connection;
pub mod error;

pub use client::{DroneClient, StatusUpdate};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
