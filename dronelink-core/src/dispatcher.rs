//! Command dispatch.

use crate::command::Command;
use crate::history::{CommandHistory, CommandRecord};

/// Result of dispatching a command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The command was executed and recorded.
    Executed {
        command: Command,
        record: CommandRecord,
    },
    /// The name is not in the action table. Nothing was recorded.
    Unknown { name: String },
}

impl DispatchOutcome {
    /// Returns the human-readable status text for this outcome.
    pub fn description(&self) -> String {
        match self {
            DispatchOutcome::Executed { command, .. } => command.description().to_string(),
            DispatchOutcome::Unknown { name } => format!("Unknown command: {}", name),
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, DispatchOutcome::Executed { .. })
    }
}

/// Executes commands on behalf of authenticated identities.
#[derive(Debug, Default)]
pub struct CommandDispatcher {
    history: CommandHistory,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches a single command name for `identity`.
    pub fn dispatch(&self, identity: &str, name: &str) -> DispatchOutcome {
        match Command::from_name(name) {
            Some(command) => {
                Self::execute(identity, command);
                let record = self.history.append(identity, command);
                tracing::debug!(
                    "[{}] recorded {} as #{}",
                    identity,
                    command,
                    record.sequence
                );
                DispatchOutcome::Executed { command, record }
            }
            None => {
                tracing::info!("[{}] Unknown command: {}", identity, name);
                DispatchOutcome::Unknown {
                    name: name.to_string(),
                }
            }
        }
    }

    /// Dispatches names in submission order.
    ///
    /// Each command is recorded before the next one runs.
    pub fn dispatch_batch<'a, I>(&self, identity: &str, names: I) -> Vec<DispatchOutcome>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .map(|name| self.dispatch(identity, name))
            .collect()
    }

    /// Actions describe agent behaviour; there is no remote call to make.
    fn execute(identity: &str, command: Command) {
        tracing::info!("[{}] Command - {}", identity, command.description());
    }

    /// Returns a snapshot of the full history.
    pub fn history(&self) -> Vec<CommandRecord> {
        self.history.records()
    }

    /// Returns a snapshot of the history for one identity.
    pub fn history_for(&self, identity: &str) -> Vec<CommandRecord> {
        self.history.records_for(identity)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_commands_report_fixed_descriptions() {
        let dispatcher = CommandDispatcher::new();
        let cases = [
            ("takeoff", "Drone is taking off"),
            ("land", "Drone is landing"),
            ("patrol", "Drone is patrolling"),
            ("capture_photo", "Drone captured a photo"),
            ("record_video", "Drone is recording a video"),
        ];

        for (idx, (name, expected)) in cases.iter().enumerate() {
            let outcome = dispatcher.dispatch("drone1", name);
            assert!(outcome.is_executed());
            assert_eq!(outcome.description(), *expected);
            assert_eq!(dispatcher.history_len(), idx + 1);
        }
    }

    #[test]
    fn test_unknown_command_is_not_recorded() {
        let dispatcher = CommandDispatcher::new();
        let outcome = dispatcher.dispatch("drone1", "bogus");

        assert_eq!(
            outcome,
            DispatchOutcome::Unknown {
                name: "bogus".to_string()
            }
        );
        assert_eq!(outcome.description(), "Unknown command: bogus");
        assert_eq!(dispatcher.history_len(), 0);
    }

    #[test]
    fn test_record_carries_identity() {
        let dispatcher = CommandDispatcher::new();
        let outcome = dispatcher.dispatch("drone7", "patrol");

        match outcome {
            DispatchOutcome::Executed { command, record } => {
                assert_eq!(command, Command::Patrol);
                assert_eq!(record.identity, "drone7");
                assert_eq!(record.command, Command::Patrol);
                assert_eq!(record.sequence, 1);
            }
            other => panic!("expected execution, got {:?}", other),
        }
        assert_eq!(dispatcher.history_for("drone7").len(), 1);
        assert!(dispatcher.history_for("drone1").is_empty());
    }

    #[test]
    fn test_batch_preserves_submission_order() {
        let dispatcher = CommandDispatcher::new();
        let outcomes =
            dispatcher.dispatch_batch("drone1", ["takeoff", "patrol", "hover", "land"]);

        assert_eq!(outcomes.len(), 4);
        assert!(!outcomes[2].is_executed());

        let recorded: Vec<_> = dispatcher.history().into_iter().map(|r| r.command).collect();
        assert_eq!(
            recorded,
            vec![Command::TakeOff, Command::Patrol, Command::Land]
        );
    }

    proptest! {
        #[test]
        fn history_matches_known_subsequence(
            names in proptest::collection::vec(
                prop_oneof![
                    Just("takeoff"),
                    Just("land"),
                    Just("patrol"),
                    Just("capture_photo"),
                    Just("record_video"),
                    Just("hover"),
                    Just("bogus"),
                ],
                0..32,
            )
        ) {
            let dispatcher = CommandDispatcher::new();
            for name in &names {
                dispatcher.dispatch("drone1", name);
            }

            let expected: Vec<_> = names.iter().filter_map(|n| Command::from_name(n)).collect();
            let recorded: Vec<_> = dispatcher.history().into_iter().map(|r| r.command).collect();
            prop_assert_eq!(recorded, expected);

            let sequences: Vec<_> = dispatcher.history().into_iter().map(|r| r.sequence).collect();
            let ascending: Vec<_> = (1..=sequences.len() as u64).collect();
            prop_assert_eq!(sequences, ascending);
        }
    }
}
