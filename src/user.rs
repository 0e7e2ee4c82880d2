use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identifies one client connection for its whole lifetime.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out connection ids, starting at 1.
#[derive(Debug)]
pub(crate) struct ConnectionIds(AtomicU64);

impl Default for ConnectionIds {
    fn default() -> Self {
        Self(AtomicU64::new(1))
    }
}

impl ConnectionIds {
    pub(crate) fn next(&self) -> ConnectionId {
        ConnectionId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// A connected client.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct User {
    /// The connection id.
    pub id: ConnectionId,

    /// Where the client connected from.
    pub address: Arc<String>,
}

impl User {
    pub(crate) fn new(id: ConnectionId, address: &str) -> Self {
        Self {
            id,
            address: Arc::new(address.into()),
        }
    }
}

impl Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}@{}", self.id, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let ids = ConnectionIds::default();

        assert_eq!(ids.next(), ConnectionId(1));
        assert_eq!(ids.next(), ConnectionId(2));
    }
}
