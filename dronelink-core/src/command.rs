//! The fixed set of drone commands.

use std::fmt;

/// A drone command. Commands carry no parameters in this protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    TakeOff,
    Land,
    Patrol,
    CapturePhoto,
    RecordVideo,
}

/// One row of the action table.
#[derive(Debug)]
pub struct Action {
    /// Wire name accepted in `COMMAND:<name>`.
    pub name: &'static str,
    pub command: Command,
    /// Status text reported back after execution.
    pub description: &'static str,
}

/// Action table, indexed by `Command` discriminant.
///
/// Adding a command means adding a variant and one row here.
pub const ACTION_TABLE: &[Action] = &[
    Action {
        name: "takeoff",
        command: Command::TakeOff,
        description: "Drone is taking off",
    },
    Action {
        name: "land",
        command: Command::Land,
        description: "Drone is landing",
    },
    Action {
        name: "patrol",
        command: Command::Patrol,
        description: "Drone is patrolling",
    },
    Action {
        name: "capture_photo",
        command: Command::CapturePhoto,
        description: "Drone captured a photo",
    },
    Action {
        name: "record_video",
        command: Command::RecordVideo,
        description: "Drone is recording a video",
    },
];

/// Alternate spellings that resolve to a table entry.
const ALIASES: &[(&str, Command)] = &[("take_off", Command::TakeOff)];

impl Command {
    /// Resolves a wire name (or alias) to a command.
    pub fn from_name(name: &str) -> Option<Command> {
        ACTION_TABLE
            .iter()
            .find(|action| action.name == name)
            .map(|action| action.command)
            .or_else(|| {
                ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == name)
                    .map(|(_, command)| *command)
            })
    }

    fn action(self) -> &'static Action {
        &ACTION_TABLE[self as usize]
    }

    /// Returns the canonical wire name.
    pub fn name(self) -> &'static str {
        self.action().name
    }

    /// Returns the fixed status description.
    pub fn description(self) -> &'static str {
        self.action().description
    }

    /// Iterates over every command in table order.
    pub fn all() -> impl Iterator<Item = Command> {
        ACTION_TABLE.iter().map(|action| action.command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
