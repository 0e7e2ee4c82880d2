//! The Control Center owns everything shared between connections:
//! who is connected, the serial arbitration state and the power state.
//!
//! It runs as a single task, so all of it changes one event at a time.
//! Connections reach it through a [`ControlCenterHandle`].

use std::{fmt::Display, time::Duration};

use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Instant},
};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    actions::Reply,
    arbitrator::{Arbitrator, Wiring},
    error::Error,
    events::Broadcast,
    queue::QueuedCommand,
    registry::Connections,
    serial::{link::DeviceLinkHandle, LinkEvent},
    user::{ConnectionId, User},
};

/// Inform the control center of events.
#[derive(Debug)]
pub(crate) enum Inform {
    /// A user arrived. Replies for them go to `replies`.
    UserArrived {
        user: User,
        replies: mpsc::UnboundedSender<Reply>,
    },

    /// A user left.
    /// Their queued commands will be skipped when their turn comes.
    UserLeft(User),

    /// Device commands to queue on behalf of a user.
    Enqueue {
        owner: ConnectionId,
        commands: Vec<String>,
        flag: Option<Value>,
        priority: bool,
    },

    /// The power relay was switched.
    PowerChanged(bool),
}

impl Display for Inform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inform::UserArrived { user, .. } => write!(f, "user arrived: {user}"),
            Inform::UserLeft(user) => write!(f, "user left: {user}"),
            Inform::Enqueue {
                owner,
                commands,
                priority,
                ..
            } => write!(f, "#{owner} queues {commands:?} (priority: {priority})"),
            Inform::PowerChanged(on) => write!(f, "power changed to {on}"),
        }
    }
}

/// A snapshot of the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Status {
    pub(crate) clients: usize,
    pub(crate) queue_size: usize,
    pub(crate) device_healthy: bool,
    pub(crate) power_on: bool,
}

/// What came of asking for a device reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reconnect {
    /// The device was fine, nothing was done.
    NotNeeded,

    /// An attempt was made. Whether the device is open now.
    Attempted(bool),
}

#[derive(Debug)]
pub(crate) enum ControlCenterMessage {
    Inform(Inform),
    Status(oneshot::Sender<Status>),
    Reconnect(oneshot::Sender<Reconnect>),
}

#[derive(Debug, Clone)]
pub(crate) struct ControlCenterHandle(mpsc::UnboundedSender<ControlCenterMessage>);

impl ControlCenterHandle {
    pub(crate) fn new(
        link: DeviceLinkHandle,
        link_events: mpsc::UnboundedReceiver<LinkEvent>,
        timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let control_center = ControlCenter {
            messages: rx,
            link,
            link_events,
            connections: Connections::default(),
            arbitrator: Arbitrator::new(timeout),
            power_on: false,
        };

        tokio::spawn(control_center.run().instrument(info_span!("Control Center")));

        ControlCenterHandle(tx)
    }

    /// Inform the control center of some event.
    pub(crate) fn inform(&self, information: Inform) {
        if let Err(e) = self.0.send(ControlCenterMessage::Inform(information)) {
            warn!("Control center is gone, dropping: {}", e.0.describe());
        }
    }

    pub(crate) async fn status(&self) -> Result<Status, Error> {
        let (tx, rx) = oneshot::channel();

        self.0
            .send(ControlCenterMessage::Status(tx))
            .map_err(|_| Error::InternalIssue("Control center is gone".into()))?;

        rx.await
            .map_err(|_| Error::InternalIssue("Control center did not answer".into()))
    }

    pub(crate) async fn reconnect(&self) -> Result<Reconnect, Error> {
        let (tx, rx) = oneshot::channel();

        self.0
            .send(ControlCenterMessage::Reconnect(tx))
            .map_err(|_| Error::InternalIssue("Control center is gone".into()))?;

        rx.await
            .map_err(|_| Error::InternalIssue("Control center did not answer".into()))
    }
}

impl ControlCenterMessage {
    fn describe(&self) -> String {
        match self {
            ControlCenterMessage::Inform(information) => information.to_string(),
            ControlCenterMessage::Status(_) => "status query".into(),
            ControlCenterMessage::Reconnect(_) => "reconnect request".into(),
        }
    }
}

/// The arbitrator's view of the outside world.
struct Wires<'a> {
    connections: &'a Connections,
    link: &'a DeviceLinkHandle,
}

impl Wiring for Wires<'_> {
    fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains(id)
    }

    fn reply(&mut self, id: ConnectionId, reply: Reply) {
        debug!("Replying to #{id}: {reply}");
        self.connections.send(id, reply);
    }

    fn write(&mut self, command: &str) {
        self.link.write(command);
    }
}

struct ControlCenter {
    /// Messages for the control center to handle.
    messages: mpsc::UnboundedReceiver<ControlCenterMessage>,

    link: DeviceLinkHandle,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,

    connections: Connections,
    arbitrator: Arbitrator,

    /// Last commanded power state.
    power_on: bool,
}

impl ControlCenter {
    fn broadcast(&self, broadcast: Broadcast) {
        info!(%broadcast, "Broadcasting");
        self.connections.broadcast(&broadcast.to_reply());
    }

    fn status(&self) -> Status {
        Status {
            clients: self.connections.len(),
            queue_size: self.arbitrator.queue_size(),
            device_healthy: self.arbitrator.is_device_healthy(),
            power_on: self.power_on,
        }
    }

    fn handle_information(&mut self, information: Inform) {
        debug!(%information, "Got information");

        match information {
            Inform::UserArrived { user, replies } => {
                self.connections.insert(user, replies);
                self.broadcast(Broadcast::ClientCount(self.connections.len()));
            }
            Inform::UserLeft(user) => {
                if self.connections.remove(user.id).is_none() {
                    warn!(%user, "Unknown user left");
                }
                self.broadcast(Broadcast::ClientCount(self.connections.len()));
            }
            Inform::Enqueue {
                owner,
                commands,
                flag,
                priority,
            } => {
                let mut wiring = Wires {
                    connections: &self.connections,
                    link: &self.link,
                };

                for command in commands {
                    let command = QueuedCommand::new(&command, owner, flag.clone());
                    self.arbitrator
                        .submit(command, priority, &mut wiring, Instant::now());
                }
            }
            Inform::PowerChanged(on) => {
                self.power_on = on;
                self.broadcast(Broadcast::PowerState(on));
            }
        }
    }

    fn handle_reconnect(&self, response: oneshot::Sender<Reconnect>) {
        if self.arbitrator.is_device_healthy() {
            let _ = response.send(Reconnect::NotNeeded);
            return;
        }

        let (tx, rx) = oneshot::channel();
        self.link.reopen(tx);

        // The link answers once it has tried; don't hold up everyone else meanwhile.
        tokio::spawn(async move {
            let opened = rx.await.unwrap_or(false);
            let _ = response.send(Reconnect::Attempted(opened));
        });
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        let mut wiring = Wires {
            connections: &self.connections,
            link: &self.link,
        };
        let now = Instant::now();

        match event {
            LinkEvent::Opened => {
                if self.arbitrator.set_device_healthy(true) {
                    self.broadcast(Broadcast::DeviceHealth(true));
                }
                self.arbitrator.drain(&mut wiring, now);
            }
            LinkEvent::Line(line) => {
                self.arbitrator.on_line(&line, &mut wiring, now);
            }
            LinkEvent::Lost(reason) => {
                if self.arbitrator.set_device_healthy(false) {
                    warn!(%reason, "Device is unavailable");
                    self.broadcast(Broadcast::DeviceHealth(false));
                }
                self.arbitrator.drain(&mut wiring, now);
            }
            LinkEvent::Closed => {
                self.arbitrator.set_device_healthy(false);
                info!("Device link closed");
            }
        }
    }

    fn handle_timeout(&mut self) {
        let mut wiring = Wires {
            connections: &self.connections,
            link: &self.link,
        };

        self.arbitrator.on_timeout(&mut wiring, Instant::now());
    }

    async fn run(mut self) {
        loop {
            let deadline = self.arbitrator.deadline();

            tokio::select! {
                message = self.messages.recv() => match message {
                    Some(ControlCenterMessage::Inform(information)) => {
                        self.handle_information(information)
                    }
                    Some(ControlCenterMessage::Status(response)) => {
                        let _ = response.send(self.status());
                    }
                    Some(ControlCenterMessage::Reconnect(response)) => {
                        self.handle_reconnect(response)
                    }
                    None => {
                        debug!("All handles dropped");
                        break;
                    }
                },
                event = self.link_events.recv() => match event {
                    Some(event) => self.handle_link_event(event),
                    None => {
                        warn!("Device link task ended");
                        break;
                    }
                },
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_timeout()
                }
            }
        }

        self.link.shutdown();
        info!("Control center stopped");
    }
}
