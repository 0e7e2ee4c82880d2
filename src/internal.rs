use std::fmt::Display;

/// A command answered by the gateway itself, never sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalCommand {
    /// Is a password required?
    Auth,
    /// The connection's own id.
    Conn,
    /// Number of connected clients.
    CountClients,
    /// Number of queued device commands.
    CountQueue,
    /// Instance description.
    Desc,
    /// Host name of the machine.
    Host,
    /// Instance id.
    Jid,
    /// Left player id.
    Lpid,
    /// Autochanger model.
    Model,
    /// Submit the password.
    Pass,
    /// Liveness.
    Ping,
    /// Listening port.
    Port,
    /// Serial device path.
    Serial,
    /// Device health.
    SerialOk,
    /// Reopen the device now, if it is down.
    SerialReconnect,
    /// When the gateway started.
    Start,
    /// Device timeout in seconds.
    Timeout,
    /// Gateway version.
    Version,
    /// The power relay line.
    PowerGpio,
    /// The last commanded power state.
    PowerState,
    /// Switch the power on.
    PowerOn,
    /// Switch the power off.
    PowerOff,
}

impl InternalCommand {
    /// Whether `normalized` is meant for the gateway rather than the device.
    pub fn is_internal(normalized: &str) -> bool {
        normalized.starts_with('/')
    }

    /// Parse an already normalized command. `None` if unknown.
    pub fn parse(normalized: &str) -> Option<Self> {
        use InternalCommand::*;

        Some(match normalized {
            "/AUTH" => Auth,
            "/CONN" => Conn,
            "/COUNTCLI" => CountClients,
            "/COUNTQUEUE" => CountQueue,
            "/DESC" => Desc,
            "/HOST" => Host,
            "/JID" => Jid,
            "/LPID" => Lpid,
            "/MODEL" => Model,
            "/PASS" => Pass,
            "/PING" => Ping,
            "/PORT" => Port,
            "/SERIAL" => Serial,
            "/SERIALOK" => SerialOk,
            "/SERIALRECO" => SerialReconnect,
            "/START" => Start,
            "/TIMEOUT" => Timeout,
            "/VERSION" => Version,
            "/POWERGPIO" => PowerGpio,
            "/POWERSTATE" => PowerState,
            "/POWERON" => PowerOn,
            "/POWEROFF" => PowerOff,
            _ => return None,
        })
    }

    /// The wire name, as echoed in replies and broadcasts.
    pub fn name(&self) -> &'static str {
        use InternalCommand::*;

        match self {
            Auth => "/AUTH",
            Conn => "/CONN",
            CountClients => "/COUNTCLI",
            CountQueue => "/COUNTQUEUE",
            Desc => "/DESC",
            Host => "/HOST",
            Jid => "/JID",
            Lpid => "/LPID",
            Model => "/MODEL",
            Pass => "/PASS",
            Ping => "/PING",
            Port => "/PORT",
            Serial => "/SERIAL",
            SerialOk => "/SERIALOK",
            SerialReconnect => "/SERIALRECO",
            Start => "/START",
            Timeout => "/TIMEOUT",
            Version => "/VERSION",
            PowerGpio => "/POWERGPIO",
            PowerState => "/POWERSTATE",
            PowerOn => "/POWERON",
            PowerOff => "/POWEROFF",
        }
    }
}

impl Display for InternalCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
