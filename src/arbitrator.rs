//! Serial arbitration.
//!
//! Only one command may be on the wire at a time.
//! The [`Arbitrator`] pulls commands off the [`CommandQueue`], writes them to the device,
//! and resolves each one by whichever comes first: a reply line or the timeout.
//!
//! It performs no IO itself. Everything outside goes through [`Wiring`],
//! and the timeout is exposed as a deadline for the owner to sleep on.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    actions::{ErrorCode, Reply},
    queue::{CommandQueue, QueuedCommand},
    user::ConnectionId,
};

/// Stands in for a deadline too far out to represent.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// What the arbitrator needs from the outside world.
pub trait Wiring {
    /// Is this connection still registered?
    fn is_connected(&self, id: ConnectionId) -> bool;

    /// Deliver a reply. Failures are the wiring's problem, not ours.
    fn reply(&mut self, id: ConnectionId, reply: Reply);

    /// Put a command on the wire. The line terminator is added by the link.
    fn write(&mut self, command: &str);
}

#[derive(Debug)]
struct InFlight {
    command: QueuedCommand,
    started: Instant,
    deadline: Instant,
}

/// What a drain pass ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// A command was busy or a pass was already running.
    Skipped,

    /// Nothing left to run.
    Idle,

    /// A command is now in flight.
    Dispatched,
}

/// The mutual exclusion state machine in front of the device.
#[derive(Debug)]
pub struct Arbitrator {
    queue: CommandQueue,

    timeout: Duration,

    // Guards against a pass starting while another is running.
    processing: bool,

    // Whether the device link is confirmed open.
    device_healthy: bool,

    // Set exactly while the device is busy with a command.
    in_flight: Option<InFlight>,
}

impl Arbitrator {
    /// A new, idle arbitrator. The device starts out unhealthy until the link reports open.
    pub fn new(timeout: Duration) -> Self {
        Self {
            queue: CommandQueue::default(),
            timeout,
            processing: false,
            device_healthy: false,
            in_flight: None,
        }
    }

    /// Number of commands waiting, not counting the one in flight.
    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    /// A command is on the wire.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The command on the wire, if any.
    pub fn current_command(&self) -> Option<&QueuedCommand> {
        self.in_flight.as_ref().map(|in_flight| &in_flight.command)
    }

    /// When the in-flight command times out.
    pub fn deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|in_flight| in_flight.deadline)
    }

    /// Whether the device is believed usable.
    pub fn is_device_healthy(&self) -> bool {
        self.device_healthy
    }

    /// Record a device health change. Returns true if it actually changed.
    pub fn set_device_healthy(&mut self, healthy: bool) -> bool {
        let changed = self.device_healthy != healthy;
        self.device_healthy = healthy;
        changed
    }

    /// Queue a command and try to run it.
    pub fn submit<W: Wiring>(
        &mut self,
        command: QueuedCommand,
        priority: bool,
        wiring: &mut W,
        now: Instant,
    ) -> Drain {
        debug!(%command, priority, "Queued");
        self.queue.enqueue(command, priority);
        self.drain(wiring, now)
    }

    /// Run the next runnable command, unless one is already in flight.
    ///
    /// Commands that cannot run (owner gone, too long, device down) are
    /// resolved on the spot and the pass moves on to the next one.
    pub fn drain<W: Wiring>(&mut self, wiring: &mut W, now: Instant) -> Drain {
        if self.processing || self.is_busy() {
            return Drain::Skipped;
        }
        self.processing = true;

        let outcome = loop {
            let Some(command) = self.queue.dequeue_next() else {
                break Drain::Idle;
            };

            if !wiring.is_connected(command.owner) {
                debug!(%command, "Owner left, discarding");
                continue;
            }

            if command.exceeds_max_length() {
                debug!(%command, "Command exceeds the maximum length");
                let reply = Reply::failed(&command.text, command.flag, ErrorCode::CommandTooLong);
                wiring.reply(command.owner, reply);
                continue;
            }

            if !self.device_healthy {
                debug!(%command, "Device is not available");
                let reply =
                    Reply::failed(&command.text, command.flag, ErrorCode::DeviceUnavailable);
                wiring.reply(command.owner, reply);
                continue;
            }

            debug!(%command, "Executing");
            wiring.write(&command.text);
            self.in_flight = Some(InFlight {
                command,
                started: now,
                deadline: now
                    .checked_add(self.timeout)
                    .unwrap_or_else(|| now + FAR_FUTURE),
            });

            break Drain::Dispatched;
        };

        self.processing = false;
        outcome
    }

    /// The line assembler completed a line.
    pub fn on_line<W: Wiring>(&mut self, line: &[u8], wiring: &mut W, now: Instant) -> Drain {
        let answer = clean_reply(line);

        let Some(InFlight { command, started, .. }) = self.in_flight.take() else {
            warn!(%answer, "Device sent a line while idle, discarding");
            return Drain::Skipped;
        };

        debug!(
            "Read from device: {answer} in {}ms",
            now.saturating_duration_since(started).as_millis()
        );

        let reply = Reply::ok(&command.text, command.flag, answer);
        self.resolve(command.owner, reply, wiring);

        self.drain(wiring, now)
    }

    /// Call when the deadline has passed.
    pub fn on_timeout<W: Wiring>(&mut self, wiring: &mut W, now: Instant) -> Drain {
        match &self.in_flight {
            Some(in_flight) if now >= in_flight.deadline => {}
            _ => return Drain::Skipped,
        }

        let Some(InFlight { command, .. }) = self.in_flight.take() else {
            return Drain::Skipped;
        };

        info!(
            timeout = ?self.timeout,
            "Timeout reached for #{}, command {} aborted",
            command.owner,
            command.text
        );

        let reply = Reply::failed(&command.text, command.flag, ErrorCode::Timeout);
        self.resolve(command.owner, reply, wiring);

        self.drain(wiring, now)
    }

    fn resolve<W: Wiring>(&mut self, owner: ConnectionId, reply: Reply, wiring: &mut W) {
        if wiring.is_connected(owner) {
            wiring.reply(owner, reply);
        } else {
            debug!("#{owner} has closed the connection before the reply");
        }
    }
}

/// Drop anything outside ASCII and surrounding whitespace.
pub fn clean_reply(line: &[u8]) -> String {
    let ascii = line
        .iter()
        .copied()
        .filter(u8::is_ascii)
        .map(char::from)
        .collect::<String>();

    ascii.trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct Recorder {
        connected: HashSet<ConnectionId>,
        writes: Vec<String>,
        replies: Vec<(ConnectionId, Reply)>,
    }

    impl Recorder {
        fn with_connections(ids: &[u64]) -> Self {
            Self {
                connected: ids.iter().copied().map(ConnectionId).collect(),
                ..Default::default()
            }
        }

        fn codes(&self) -> Vec<(String, ErrorCode)> {
            self.replies
                .iter()
                .map(|(_, reply)| (reply.command.clone(), reply.error))
                .collect()
        }
    }

    impl Wiring for Recorder {
        fn is_connected(&self, id: ConnectionId) -> bool {
            self.connected.contains(&id)
        }

        fn reply(&mut self, id: ConnectionId, reply: Reply) {
            self.replies.push((id, reply));
        }

        fn write(&mut self, command: &str) {
            self.writes.push(command.into());
        }
    }

    fn healthy() -> Arbitrator {
        let mut arbitrator = Arbitrator::new(TIMEOUT);
        arbitrator.set_device_healthy(true);
        arbitrator
    }

    fn command(text: &str, owner: u64) -> QueuedCommand {
        QueuedCommand::new(text, ConnectionId(owner), None)
    }

    #[test]
    fn reply_round_trip_keeps_flag() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1]);
        let now = Instant::now();

        let flag = json!({"tag": "t1", "n": [1, 2]});
        let drain = arbitrator.submit(
            QueuedCommand::new("XYZ", ConnectionId(1), Some(flag.clone())),
            false,
            &mut wiring,
            now,
        );
        assert_eq!(drain, Drain::Dispatched);
        assert_eq!(wiring.writes, vec!["XYZ"]);

        arbitrator.on_line(b"OK", &mut wiring, now);

        assert_eq!(
            wiring.replies,
            vec![(ConnectionId(1), Reply::ok("XYZ", Some(flag), "OK"))]
        );
        assert!(!arbitrator.is_busy());
    }

    #[test]
    fn only_one_command_in_flight() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1]);
        let now = Instant::now();

        arbitrator.submit(command("A", 1), false, &mut wiring, now);
        let second = arbitrator.submit(command("B", 1), false, &mut wiring, now);

        assert_eq!(second, Drain::Skipped);
        assert_eq!(arbitrator.drain(&mut wiring, now), Drain::Skipped);
        assert_eq!(wiring.writes, vec!["A"]);
        assert_eq!(arbitrator.queue_size(), 1);
        assert_eq!(arbitrator.current_command().map(|c| c.text.as_str()), Some("A"));

        arbitrator.on_line(b"R", &mut wiring, now);
        assert_eq!(wiring.writes, vec!["A", "B"]);
        assert_eq!(arbitrator.queue_size(), 0);
    }

    #[test]
    fn busy_iff_current_command() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1]);
        let now = Instant::now();

        assert!(!arbitrator.is_busy());
        assert!(arbitrator.current_command().is_none());
        assert!(arbitrator.deadline().is_none());

        arbitrator.submit(command("A", 1), false, &mut wiring, now);
        assert!(arbitrator.is_busy());
        assert!(arbitrator.current_command().is_some());
        assert_eq!(arbitrator.deadline(), Some(now + TIMEOUT));
    }

    #[test]
    fn unrepresentable_timeout_still_dispatches() {
        let mut arbitrator = Arbitrator::new(Duration::MAX);
        arbitrator.set_device_healthy(true);
        let mut wiring = Recorder::with_connections(&[1]);
        let now = Instant::now();

        let drain = arbitrator.submit(command("A", 1), false, &mut wiring, now);

        assert_eq!(drain, Drain::Dispatched);
        assert!(arbitrator.deadline().unwrap() > now);
        assert_eq!(arbitrator.on_timeout(&mut wiring, now), Drain::Skipped);

        arbitrator.on_line(b"R", &mut wiring, now);
        assert_eq!(wiring.codes(), vec![("A".into(), ErrorCode::Success)]);
    }

    #[test]
    fn too_long_command_never_reaches_device() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1]);
        let now = Instant::now();

        arbitrator.submit(command("ABCDEFGHIJKLMNOPQRSTU", 1), false, &mut wiring, now);

        assert!(wiring.writes.is_empty());
        assert_eq!(
            wiring.codes(),
            vec![("ABCDEFGHIJKLMNOPQRSTU".into(), ErrorCode::CommandTooLong)]
        );
        assert_eq!(wiring.replies[0].1.result, crate::actions::ReplyValue::empty());
    }

    #[test]
    fn rejections_keep_draining() {
        // A too-long command followed by a valid one: the valid one goes out
        // in the same pass without waiting for another trigger.
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1]);
        let now = Instant::now();

        arbitrator.submit(command("BUSY", 1), false, &mut wiring, now);
        arbitrator.submit(command("ABCDEFGHIJKLMNOPQRSTUVWXYZ", 1), false, &mut wiring, now);
        arbitrator.submit(command("NEXT", 1), false, &mut wiring, now);

        arbitrator.on_line(b"R", &mut wiring, now);

        assert_eq!(wiring.writes, vec!["BUSY", "NEXT"]);
        assert_eq!(
            wiring.codes(),
            vec![
                ("BUSY".into(), ErrorCode::Success),
                ("ABCDEFGHIJKLMNOPQRSTUVWXYZ".into(), ErrorCode::CommandTooLong),
            ]
        );
    }

    #[test]
    fn unhealthy_device_rejects_everything_queued() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1, 2]);
        let now = Instant::now();

        arbitrator.submit(command("A", 1), false, &mut wiring, now);
        arbitrator.submit(command("B", 1), false, &mut wiring, now);
        arbitrator.submit(command("C", 2), false, &mut wiring, now);

        // Device goes away while A is in flight.
        arbitrator.set_device_healthy(false);
        arbitrator.on_timeout(&mut wiring, now + TIMEOUT);

        assert_eq!(wiring.writes, vec!["A"]);
        assert_eq!(
            wiring.codes(),
            vec![
                ("A".into(), ErrorCode::Timeout),
                ("B".into(), ErrorCode::DeviceUnavailable),
                ("C".into(), ErrorCode::DeviceUnavailable),
            ]
        );
        assert_eq!(arbitrator.queue_size(), 0);

        // Back again: new commands go through.
        arbitrator.set_device_healthy(true);
        arbitrator.submit(command("D", 1), false, &mut wiring, now);
        assert_eq!(wiring.writes, vec!["A", "D"]);
    }

    #[test]
    fn new_arbitrator_is_unhealthy() {
        let mut arbitrator = Arbitrator::new(TIMEOUT);
        let mut wiring = Recorder::with_connections(&[1]);

        arbitrator.submit(command("A", 1), false, &mut wiring, Instant::now());

        assert!(wiring.writes.is_empty());
        assert_eq!(wiring.codes(), vec![("A".into(), ErrorCode::DeviceUnavailable)]);
    }

    #[test]
    fn orphaned_commands_are_skipped_silently() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1, 2, 3]);
        let now = Instant::now();

        arbitrator.submit(command("BUSY", 3), false, &mut wiring, now);
        arbitrator.submit(command("OPEN1", 1), false, &mut wiring, now);
        arbitrator.submit(command("OPEN2", 2), false, &mut wiring, now);

        // Client 1 leaves before its command is due.
        wiring.connected.remove(&ConnectionId(1));

        arbitrator.on_line(b"R", &mut wiring, now);
        assert_eq!(wiring.writes, vec!["BUSY", "OPEN2"]);

        arbitrator.on_line(b"R", &mut wiring, now);
        assert_eq!(
            wiring
                .replies
                .iter()
                .map(|(id, reply)| (id.0, reply.command.as_str()))
                .collect::<Vec<_>>(),
            vec![(3, "BUSY"), (2, "OPEN2")]
        );
    }

    #[test]
    fn timeout_replies_and_moves_on() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1]);
        let now = Instant::now();

        arbitrator.submit(command("A", 1), false, &mut wiring, now);
        arbitrator.submit(command("B", 1), false, &mut wiring, now);

        // Too early: nothing happens.
        assert_eq!(
            arbitrator.on_timeout(&mut wiring, now + TIMEOUT / 2),
            Drain::Skipped
        );
        assert!(wiring.replies.is_empty());

        let later = now + TIMEOUT;
        assert_eq!(arbitrator.on_timeout(&mut wiring, later), Drain::Dispatched);
        assert_eq!(wiring.codes(), vec![("A".into(), ErrorCode::Timeout)]);
        assert_eq!(wiring.writes, vec!["A", "B"]);
        assert_eq!(arbitrator.deadline(), Some(later + TIMEOUT));
    }

    #[test]
    fn timeout_after_reply_is_a_no_op() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1]);
        let now = Instant::now();

        arbitrator.submit(command("A", 1), false, &mut wiring, now);
        arbitrator.on_line(b"OK", &mut wiring, now);

        assert_eq!(
            arbitrator.on_timeout(&mut wiring, now + TIMEOUT * 2),
            Drain::Skipped
        );
        assert_eq!(wiring.codes(), vec![("A".into(), ErrorCode::Success)]);
    }

    #[test]
    fn line_while_idle_is_discarded() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1]);

        assert_eq!(
            arbitrator.on_line(b"LATE", &mut wiring, Instant::now()),
            Drain::Skipped
        );
        assert!(wiring.replies.is_empty());
    }

    #[test]
    fn reply_to_departed_owner_is_dropped_but_queue_continues() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1, 2]);
        let now = Instant::now();

        arbitrator.submit(command("A", 1), false, &mut wiring, now);
        arbitrator.submit(command("B", 2), false, &mut wiring, now);

        wiring.connected.remove(&ConnectionId(1));
        arbitrator.on_line(b"R", &mut wiring, now);

        assert!(wiring.replies.is_empty());
        assert_eq!(wiring.writes, vec!["A", "B"]);
    }

    #[test]
    fn priority_commands_jump_the_queue() {
        let mut arbitrator = healthy();
        let mut wiring = Recorder::with_connections(&[1]);
        let now = Instant::now();

        arbitrator.submit(command("FIRST", 1), false, &mut wiring, now);
        arbitrator.submit(command("N1", 1), false, &mut wiring, now);
        arbitrator.submit(command("P1", 1), true, &mut wiring, now);
        arbitrator.submit(command("P2", 1), true, &mut wiring, now);

        for _ in 0..4 {
            arbitrator.on_line(b"R", &mut wiring, now);
        }

        assert_eq!(wiring.writes, vec!["FIRST", "P2", "P1", "N1"]);
    }

    #[test]
    fn clean_reply_strips_non_ascii_and_whitespace() {
        assert_eq!(clean_reply(b" R\xff\xfe "), "R");
        assert_eq!(clean_reply("E04\u{00e9}".as_bytes()), "E04");
        assert_eq!(clean_reply(b""), "");
    }
}
