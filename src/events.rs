use std::fmt::Display;

use crate::{
    actions::{ErrorCode, Reply},
    internal::InternalCommand,
};

/// Things every connected client is told about, unasked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    /// The number of connected clients changed.
    ClientCount(usize),

    /// The device link went up or down.
    DeviceHealth(bool),

    /// The power relay was switched.
    PowerState(bool),
}

impl Broadcast {
    /// The reply sent to each client.
    pub fn to_reply(self) -> Reply {
        match self {
            Broadcast::ClientCount(count) => {
                Reply::ok(InternalCommand::CountClients.name(), None, count)
            }
            Broadcast::DeviceHealth(true) => Reply::ok(InternalCommand::SerialOk.name(), None, true),
            Broadcast::DeviceHealth(false) => Reply::with_code(
                InternalCommand::SerialOk.name(),
                None,
                false,
                ErrorCode::ActionFailed,
            ),
            Broadcast::PowerState(on) => Reply::ok(InternalCommand::PowerState.name(), None, on),
        }
    }
}

impl Display for Broadcast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Broadcast::ClientCount(count) => write!(f, "{count} client(s) connected"),
            Broadcast::DeviceHealth(true) => write!(f, "device recovered"),
            Broadcast::DeviceHealth(false) => write!(f, "device lost"),
            Broadcast::PowerState(on) => write!(f, "power {}", if *on { "on" } else { "off" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;

    fn as_json(broadcast: Broadcast) -> Value {
        serde_json::from_str(&broadcast.to_reply().serialize()).unwrap()
    }

    #[test]
    fn client_count() {
        assert_eq!(
            as_json(Broadcast::ClientCount(3)),
            json!({"c": "/COUNTCLI", "r": 3, "e": 0})
        );
    }

    #[test]
    fn health_lost_carries_code_ten() {
        assert_eq!(
            as_json(Broadcast::DeviceHealth(false)),
            json!({"c": "/SERIALOK", "r": false, "e": 10})
        );
        assert_eq!(
            as_json(Broadcast::DeviceHealth(true)),
            json!({"c": "/SERIALOK", "r": true, "e": 0})
        );
    }

    #[test]
    fn power_state() {
        assert_eq!(
            as_json(Broadcast::PowerState(true)),
            json!({"c": "/POWERSTATE", "r": true, "e": 0})
        );
    }
}
