use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use crate::{
    error::Error,
    serial::{Connector, DeviceStream},
};

/// Opens a tty (or COM port) with the autochanger's fixed line settings: 8N1, no flow control.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud: u32,
}

impl SerialConnector {
    /// Describe how to reach the device.
    /// The tty should likely be along the lines of `/dev/ttyUSB0` on unix, and `COMx` on Windows.
    ///
    /// Nothing is opened yet.
    pub fn new(path: &str, baud: u32) -> Result<Self, Error> {
        if path.trim().is_empty() {
            return Err(Error::BadConfig("The serial port path is empty".into()));
        }

        if baud == 0 {
            return Err(Error::BadConfig(format!(
                "The baud rate for `{path}` must be positive"
            )));
        }

        Ok(Self {
            path: path.into(),
            baud,
        })
    }
}

fn try_create_serial_port(baud: u32, path: &str) -> Result<SerialStream, Error> {
    tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| Error::DeviceOpen {
            path: path.into(),
            problem: e.to_string(),
        })
}

impl Connector for SerialConnector {
    fn open(&self) -> Result<DeviceStream, Error> {
        debug!(%self.path, %self.baud, "Opening port");
        let stream = try_create_serial_port(self.baud, &self.path)?;

        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_is_rejected() {
        let err = SerialConnector::new("  ", 9600).unwrap_err();
        assert!(err.try_into_bad_config().unwrap().contains("empty"));
    }

    #[test]
    fn zero_baud_is_rejected() {
        assert!(SerialConnector::new("/dev/ttyUSB0", 0).is_err());
    }

    #[tokio::test]
    async fn missing_device_fails_to_open() {
        let connector = SerialConnector::new("/dev/this-tty-does-not-exist", 9600).unwrap();

        assert!(matches!(
            connector.open(),
            Err(Error::DeviceOpen { .. })
        ));
    }
}
