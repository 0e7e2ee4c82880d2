use std::io;

use thiserror::Error;

use crate::serial::error::SerialPortError;

/// Errors that may occur in this library.
///
/// None of these reach a client as-is: per-command failures are
/// turned into an [`crate::actions::ErrorCode`] in a reply.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration was not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The device link could not be opened.
    #[error("Could not open the device at `{path}`. Problem: {problem}")]
    DeviceOpen {
        /// Where we tried to open the device.
        path: String,

        /// What went wrong.
        problem: String,
    },

    /// Running the power control command failed.
    #[error("Power control failed: {0}")]
    PowerControl(String),

    /// Something inside the gateway went away when it should not have.
    #[error("Internal issue: {0}")]
    InternalIssue(String),

    /// A websocket problem, client side.
    #[error("Websocket problem: {0}")]
    Websocket(#[from] tungstenite::Error),

    /// A message was not the JSON we expected.
    #[error("Bad JSON: {0}")]
    BadJson(#[from] serde_json::Error),

    /// Nothing arrived in time.
    #[error("No reply within {0:?}")]
    NoReply(std::time::Duration),

    /// The device link failed while in use.
    #[error("Device link problem: {0}")]
    Link(#[from] SerialPortError),

    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// If this is a [`Error::BadConfig`], get the problem description.
    pub fn try_into_bad_config(self) -> Option<String> {
        if let Self::BadConfig(problem) = self {
            Some(problem)
        } else {
            None
        }
    }
}

/// A problem which stops the gateway from starting.
///
/// Each class maps to its own process exit status.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The listening socket could not be bound.
    #[error("Unable to start the websocket server: {0}")]
    Bind(String),

    /// The device link could not be constructed.
    #[error("Problem with the serial port: {0}")]
    DeviceLink(#[source] Error),

    /// The TLS certificate or key could not be read.
    #[error("Unable to load TLS material: {0}")]
    Tls(#[source] io::Error),

    /// The configuration was rejected.
    #[error("Configuration rejected: {0}")]
    Config(#[source] Error),
}

impl StartupError {
    /// The process exit status for this class of failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Bind(_) => 1,
            StartupError::DeviceLink(_) => 2,
            StartupError::Tls(_) => 3,
            StartupError::Config(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            StartupError::Bind("in use".into()).exit_code(),
            StartupError::DeviceLink(Error::BadConfig("x".into())).exit_code(),
            StartupError::Tls(io::Error::new(io::ErrorKind::NotFound, "key.pem")).exit_code(),
            StartupError::Config(Error::BadConfig("x".into())).exit_code(),
        ];

        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
