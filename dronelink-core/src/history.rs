//! Append-only command execution history.

use crate::command::Command;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// One executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    /// Position in the process-wide history, starting at 1.
    pub sequence: u64,
    pub identity: String,
    pub command: Command,
    pub executed_at: DateTime<Utc>,
}

/// In-memory history of executed commands.
///
/// Records are kept in execution order for the lifetime of the process.
#[derive(Debug, Default)]
pub struct CommandHistory {
    records: Mutex<Vec<CommandRecord>>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and returns it.
    pub fn append(&self, identity: &str, command: Command) -> CommandRecord {
        let mut records = self.records.lock();
        let record = CommandRecord {
            sequence: records.len() as u64 + 1,
            identity: identity.to_string(),
            command,
            executed_at: Utc::now(),
        };
        records.push(record.clone());
        record
    }

    /// Returns a snapshot of all records.
    pub fn records(&self) -> Vec<CommandRecord> {
        self.records.lock().clone()
    }

    /// Returns a snapshot of the records for one identity.
    pub fn records_for(&self, identity: &str) -> Vec<CommandRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.identity == identity)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
