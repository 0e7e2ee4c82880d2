use std::io;

use thiserror::Error;

/// Problems on the device link.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// The device closed the stream.
    #[error("Device disconnected")]
    Disconnected,
}
