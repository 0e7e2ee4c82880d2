use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Error;

/// Serial port related errors.
pub mod error;

/// Opening a real tty.
pub mod serial_port;

/// Codecs for encoding/decoding messages to/from wire.
pub mod codecs;

/// The task owning the device connection, and its reconnection supervisor.
pub mod link;

/// A byte stream to and from the device.
pub trait AsyncDevice: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncDevice for T {}

/// An open device connection.
pub type DeviceStream = Box<dyn AsyncDevice>;

/// Knows how to open the device.
///
/// Opening may be attempted many times over the life of the gateway.
pub trait Connector: Send + Sync + 'static {
    /// Try to open the device.
    fn open(&self) -> Result<DeviceStream, Error>;

    /// Human readable description, e.g. the tty path.
    fn describe(&self) -> String;
}

/// Notifications from the device link, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The device is open and usable.
    Opened,

    /// A complete line arrived from the device, terminator excluded.
    Line(Vec<u8>),

    /// The device went away without being asked to.
    Lost(String),

    /// The link was shut down on purpose.
    Closed,
}
