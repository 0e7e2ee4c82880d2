//! Commands waiting for the device.

use std::collections::VecDeque;
use std::fmt::Display;

use serde_json::Value;

use crate::user::ConnectionId;

/// The longest command the autochanger accepts.
pub const COMMAND_MAX_LENGTH: usize = 20;

/// A device-bound command awaiting or undergoing execution.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    /// Normalized command text, without the line terminator.
    pub text: String,

    /// Who asked. Looked up in the connection registry when needed,
    /// never kept alive by this.
    pub owner: ConnectionId,

    /// Echoed in the reply.
    pub flag: Option<Value>,
}

impl QueuedCommand {
    /// Create a queued command.
    pub fn new(text: &str, owner: ConnectionId, flag: Option<Value>) -> Self {
        Self {
            text: text.into(),
            owner,
            flag,
        }
    }

    /// Whether the device would accept this many characters.
    pub fn exceeds_max_length(&self) -> bool {
        self.text.chars().count() > COMMAND_MAX_LENGTH
    }
}

impl Display for QueuedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (from #{})", self.text, self.owner)
    }
}

/// Pending commands.
///
/// Priority commands go to the front, so among themselves they are LIFO.
/// Normal commands go to the back and keep their arrival order.
#[derive(Debug, Default)]
pub struct CommandQueue(VecDeque<QueuedCommand>);

impl CommandQueue {
    /// Add a command.
    pub fn enqueue(&mut self, command: QueuedCommand, priority: bool) {
        if priority {
            self.0.push_front(command);
        } else {
            self.0.push_back(command);
        }
    }

    /// Take the next command to run, if any.
    pub fn dequeue_next(&mut self) -> Option<QueuedCommand> {
        self.0.pop_front()
    }

    /// How many commands are waiting.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// No commands are waiting.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn command(text: &str) -> QueuedCommand {
        QueuedCommand::new(text, ConnectionId(1), None)
    }

    fn drain(queue: &mut CommandQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.dequeue_next())
            .map(|c| c.text)
            .collect()
    }

    #[test]
    fn normal_commands_are_fifo() {
        let mut queue = CommandQueue::default();
        for text in ["A", "B", "C"] {
            queue.enqueue(command(text), false);
        }

        assert_eq!(queue.size(), 3);
        assert_eq!(drain(&mut queue), vec!["A", "B", "C"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn priority_commands_are_reversed_ahead_of_normal_ones() {
        let mut queue = CommandQueue::default();

        // Interleave on purpose
        queue.enqueue(command("N1"), false);
        queue.enqueue(command("P1"), true);
        queue.enqueue(command("N2"), false);
        queue.enqueue(command("P2"), true);
        queue.enqueue(command("N3"), false);
        queue.enqueue(command("P3"), true);

        assert_eq!(
            drain(&mut queue),
            vec!["P3", "P2", "P1", "N1", "N2", "N3"]
        );
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let mut queue = CommandQueue::default();
        assert!(queue.dequeue_next().is_none());
    }

    #[test]
    fn max_length_is_counted_in_characters() {
        assert!(!command("12345678901234567890").exceeds_max_length());
        assert!(command("123456789012345678901").exceeds_max_length());
    }
}
