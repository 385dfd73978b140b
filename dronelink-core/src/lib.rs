//! # dronelink-core
//!
//! Command engine for dronelink.
//!
//! This crate provides:
//! - The fixed action table mapping command names to drone behaviour
//! - Synchronous command dispatch for an authenticated identity
//! - An append-only, in-memory execution history

pub mod command;
pub mod dispatcher;
pub mod history;

pub use command::{Command, ACTION_TABLE};
pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use history::{CommandHistory, CommandRecord};
