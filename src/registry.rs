use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    actions::Reply,
    user::{ConnectionId, User},
};

#[derive(Debug)]
struct Connection {
    user: User,
    replies: mpsc::UnboundedSender<Reply>,
}

/// The live client connections and how to reach them.
#[derive(Debug, Default)]
pub(crate) struct Connections(HashMap<ConnectionId, Connection>);

impl Connections {
    pub(crate) fn insert(&mut self, user: User, replies: mpsc::UnboundedSender<Reply>) {
        self.0.insert(user.id, Connection { user, replies });
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<User> {
        self.0.remove(&id).map(|connection| connection.user)
    }

    pub(crate) fn contains(&self, id: ConnectionId) -> bool {
        self.0.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Send to one connection. A vanished receiver is logged and otherwise ignored.
    pub(crate) fn send(&self, id: ConnectionId, reply: Reply) {
        match self.0.get(&id) {
            Some(connection) => {
                if connection.replies.send(reply).is_err() {
                    debug!("{} is going away, reply dropped", connection.user);
                }
            }
            None => debug!("#{id} is not connected, reply dropped"),
        }
    }

    /// Send to every connection.
    pub(crate) fn broadcast(&self, reply: &Reply) {
        for connection in self.0.values() {
            if connection.replies.send(reply.clone()).is_err() {
                debug!("{} is going away, broadcast dropped", connection.user);
            }
        }
    }
}
