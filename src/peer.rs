use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use itertools::Itertools;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::{
    actions::{normalize_command, split_commands, ErrorCode, Reply, ReplyValue, Request},
    config::Config,
    control_center::{ControlCenterHandle, Inform, Reconnect},
    internal::InternalCommand,
    power::PowerControl,
    user::User,
};

/// Facts about this gateway which don't change while it runs.
pub(crate) struct GatewayInfo {
    pub(crate) config: Config,
    pub(crate) started: DateTime<Utc>,
    pub(crate) hostname: String,
    pub(crate) power: Option<Arc<dyn PowerControl>>,
}

impl std::fmt::Debug for GatewayInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayInfo")
            .field("id", &self.config.id)
            .field("started", &self.started)
            .field("hostname", &self.hostname)
            .field("power", &self.power.as_ref().map(|power| power.line()))
            .finish()
    }
}

#[derive(Debug)]
pub(crate) enum PeerRequest {
    UserRequest(Request),
    Shutdown,
}

pub(crate) struct PeerHandle {
    requests: mpsc::UnboundedSender<PeerRequest>,
    join_handle: JoinHandle<()>,
}

impl PeerHandle {
    pub(crate) fn new(
        user: User,
        sender: mpsc::UnboundedSender<Reply>,
        cc_handle: ControlCenterHandle,
        info: Arc<GatewayInfo>,
        span: Span,
    ) -> Self {
        let (requests, requests_receiver) = mpsc::unbounded_channel();

        let peer = Peer {
            unlocked: !info.config.requires_password(),
            user,
            sender,
            requests: requests_receiver,
            cc_handle,
            info,
        };

        let join_handle = tokio::spawn(peer.run().instrument(span));

        Self {
            requests,
            join_handle,
        }
    }

    pub(crate) fn send(&self, request: Request) {
        if self.requests.send(PeerRequest::UserRequest(request)).is_err() {
            warn!("Peer is gone, request dropped");
        }
    }

    pub(crate) async fn shutdown(self) {
        debug!("Shutting down");
        let _ = self.requests.send(PeerRequest::Shutdown);

        if let Err(e) = self.join_handle.await {
            warn!("Peer join error: {e:?}");
        }
        debug!("Shutdown complete");
    }
}

struct Peer {
    // Which user does this peer represent
    user: User,

    // Where to put replies to this peer's requests
    sender: mpsc::UnboundedSender<Reply>,

    // For reading requests to us
    requests: mpsc::UnboundedReceiver<PeerRequest>,

    // The handle to the control center,
    // which holds global state.
    cc_handle: ControlCenterHandle,

    info: Arc<GatewayInfo>,

    // Whether device and power commands are allowed.
    unlocked: bool,
}

impl Peer {
    async fn run(mut self) {
        self.cc_handle.inform(Inform::UserArrived {
            user: self.user.clone(),
            replies: self.sender.clone(),
        });

        while let Some(request) = self.requests.recv().await {
            match request {
                PeerRequest::UserRequest(request) => {
                    let span = info_span!("Request", c = ?request.command);
                    self.handle(request).instrument(span).await;
                }
                PeerRequest::Shutdown => {
                    debug!("Shutting down peer");
                    break;
                }
            }
        }

        self.cc_handle.inform(Inform::UserLeft(self.user.clone()));
    }

    fn send(&self, reply: Reply) {
        debug!("Replying: {reply}");
        if self.sender.send(reply).is_err() {
            debug!("Connection is going away, reply dropped");
        }
    }

    async fn handle(&mut self, request: Request) {
        let Some(raw) = request.command.as_deref() else {
            error!("Request without a command, ignoring");
            return;
        };

        let command = normalize_command(raw);
        debug!("Received from {}: {command}", self.user);

        if InternalCommand::is_internal(&command) {
            self.handle_internal(&command, &request).await;
            return;
        }

        if !self.unlocked {
            self.send(Reply::with_code(
                &command,
                request.flag,
                "NOPASS",
                ErrorCode::Unauthenticated,
            ));
            return;
        }

        let commands = split_commands(&command);
        if commands.is_empty() {
            debug!("Nothing to queue");
            return;
        }

        debug!("Queueing {}", commands.iter().join(", "));

        self.cc_handle.inform(Inform::Enqueue {
            owner: self.user.id,
            commands,
            priority: request.is_prioritized(),
            flag: request.flag,
        });
    }

    async fn handle_internal(&mut self, command: &str, request: &Request) {
        let Some(internal) = InternalCommand::parse(command) else {
            self.send(Reply::with_code(
                command,
                request.flag.clone(),
                "NOT UNDERSTAND",
                ErrorCode::UnknownCommand,
            ));
            return;
        };

        let (result, code) = self.answer(internal, request).await;
        let succeeded = code == ErrorCode::Success;

        self.send(Reply::with_code(command, request.flag.clone(), result, code));

        // The direct answer goes out first, then everyone hears about it.
        match internal {
            InternalCommand::PowerOn if succeeded => self.cc_handle.inform(Inform::PowerChanged(true)),
            InternalCommand::PowerOff if succeeded => {
                self.cc_handle.inform(Inform::PowerChanged(false))
            }
            _ => {}
        }
    }

    async fn answer(
        &mut self,
        internal: InternalCommand,
        request: &Request,
    ) -> (ReplyValue, ErrorCode) {
        use InternalCommand::*;

        let info = self.info.clone();
        let config = &info.config;
        let ok = |result: ReplyValue| (result, ErrorCode::Success);

        match internal {
            Auth => ok(if config.requires_password() { "YES" } else { "NO" }.into()),
            Conn => ok(self.user.id.0.into()),
            Desc => ok(config.description.as_str().into()),
            Host => ok(info.hostname.as_str().into()),
            Jid => ok(config.id.as_str().into()),
            Lpid => ok(config.left_player_id.into()),
            Model => ok(config.model.as_str().into()),
            Ping => ok("PONG".into()),
            Port => ok(config.port.into()),
            Serial => ok(config.serial.as_str().into()),
            Start => ok(info
                .started
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into()),
            Timeout => ok(config.timeout_secs.into()),
            Version => ok(env!("CARGO_PKG_VERSION").into()),
            Pass => self.check_password(request),
            CountClients | CountQueue | SerialOk | PowerState => {
                let status = match self.cc_handle.status().await {
                    Ok(status) => status,
                    Err(e) => {
                        error!(%e, "No status available");
                        return (ReplyValue::empty(), ErrorCode::ActionFailed);
                    }
                };

                match internal {
                    CountClients => ok(status.clients.into()),
                    CountQueue => ok(status.queue_size.into()),
                    SerialOk => ok(status.device_healthy.into()),
                    _ if info.power.is_none() => {
                        (ReplyValue::empty(), ErrorCode::FeatureUnavailable)
                    }
                    _ => ok(status.power_on.into()),
                }
            }
            SerialReconnect => match self.cc_handle.reconnect().await {
                Ok(Reconnect::NotNeeded) => (false.into(), ErrorCode::ReconnectNotNeeded),
                Ok(Reconnect::Attempted(opened)) => {
                    info!(opened, "Reconnect requested by {}", self.user);
                    ok(opened.into())
                }
                Err(e) => {
                    error!(%e, "Reconnect failed");
                    (false.into(), ErrorCode::ActionFailed)
                }
            },
            PowerGpio => match &info.power {
                Some(power) => ok(power.line().into()),
                None => (ReplyValue::empty(), ErrorCode::FeatureUnavailable),
            },
            PowerOn => self.switch_power(true).await,
            PowerOff => self.switch_power(false).await,
        }
    }

    fn check_password(&mut self, request: &Request) -> (ReplyValue, ErrorCode) {
        let config = &self.info.config;

        if !config.requires_password() {
            return ("OK".into(), ErrorCode::Success);
        }

        if request.value_text().as_deref() == Some(config.password.as_str()) {
            info!("{} unlocked", self.user);
            self.unlocked = true;
            ("OK".into(), ErrorCode::Success)
        } else {
            warn!("{} sent a wrong password", self.user);
            ("KO".into(), ErrorCode::WrongPassword)
        }
    }

    async fn switch_power(&self, on: bool) -> (ReplyValue, ErrorCode) {
        if !self.unlocked {
            return ("NOPASS".into(), ErrorCode::Unauthenticated);
        }

        let Some(power) = &self.info.power else {
            return (ReplyValue::empty(), ErrorCode::FeatureUnavailable);
        };

        match power.set_power(on).await {
            Ok(()) => (on.into(), ErrorCode::Success),
            Err(e) => {
                error!(%e, "Power switch failed");
                (ReplyValue::empty(), ErrorCode::ActionFailed)
            }
        }
    }
}
