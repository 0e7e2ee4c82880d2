//! A mock device, useful to test the gateway without an autochanger attached.
//!
//! Every successful open creates a fresh in-memory byte pipe.
//! The device end of it is handed to the test as a [`MockSession`],
//! which reads the commands the gateway writes and answers them.
//! Dropping the session looks like the device being unplugged.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    sync::mpsc,
};
use tokio_util::codec::{Decoder, Framed};
use tracing::debug;

use crate::{
    error::Error,
    serial::{codecs::lines::LinesCodec, Connector, DeviceStream},
};

const PIPE_CAPACITY: usize = 4096;

/// The connector half of a mock device. Give this to the gateway.
#[derive(Debug)]
pub struct MockConnector {
    available: Arc<AtomicBool>,
    sessions: mpsc::UnboundedSender<MockSession>,
}

impl Connector for MockConnector {
    fn open(&self) -> Result<DeviceStream, Error> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::DeviceOpen {
                path: self.describe(),
                problem: "mock device unavailable".into(),
            });
        }

        let (gateway_end, device_end) = tokio::io::duplex(PIPE_CAPACITY);

        self.sessions
            .send(MockSession {
                framed: LinesCodec::default().framed(device_end),
            })
            .map_err(|_| Error::DeviceOpen {
                path: self.describe(),
                problem: "nobody drives the mock device".into(),
            })?;

        debug!("Mock device opened");
        Ok(Box::new(gateway_end))
    }

    fn describe(&self) -> String {
        "mock".into()
    }
}

/// The test's side of a mock device.
#[derive(Debug)]
pub struct MockDevice {
    available: Arc<AtomicBool>,
    sessions: mpsc::UnboundedReceiver<MockSession>,
}

impl MockDevice {
    /// A new mock device, initially available.
    pub fn new() -> (MockConnector, MockDevice) {
        let available = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();

        (
            MockConnector {
                available: available.clone(),
                sessions: tx,
            },
            MockDevice {
                available,
                sessions: rx,
            },
        )
    }

    /// Whether opening the device should succeed.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Wait for the gateway to open the device.
    pub async fn next_session(&mut self) -> Option<MockSession> {
        self.sessions.recv().await
    }
}

/// One open period of a mock device.
#[derive(Debug)]
pub struct MockSession {
    framed: Framed<DuplexStream, LinesCodec>,
}

impl MockSession {
    /// The next command the gateway wrote, without its terminator.
    /// `None` if the gateway closed the device.
    pub async fn next_command(&mut self) -> Option<String> {
        match self.framed.next().await {
            Some(Ok(line)) => Some(String::from_utf8_lossy(&line).to_string()),
            _ => None,
        }
    }

    /// Answer with a terminated line.
    pub async fn reply(&mut self, line: &str) -> Result<(), Error> {
        self.framed.send(line.as_bytes().to_vec()).await?;
        Ok(())
    }

    /// Send bytes exactly as given, e.g. half a line.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let pipe = self.framed.get_mut();
        pipe.write_all(bytes).await?;
        pipe.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn session_sees_what_gateway_writes() {
        let (connector, mut device) = MockDevice::new();

        let mut gateway = connector.open().unwrap();
        let mut session = device.next_session().await.unwrap();

        gateway.write_all(b"PL1\rSE12\r").await.unwrap();

        assert_eq!(session.next_command().await.as_deref(), Some("PL1"));
        assert_eq!(session.next_command().await.as_deref(), Some("SE12"));
    }

    #[tokio::test]
    async fn replies_are_terminated() {
        let (connector, mut device) = MockDevice::new();

        let mut gateway = connector.open().unwrap();
        let mut session = device.next_session().await.unwrap();

        session.reply("R").await.unwrap();
        session.send_raw(b"E0").await.unwrap();

        let mut buf = [0u8; 4];
        gateway.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"R\rE0");
    }

    #[tokio::test]
    async fn unavailable_device_fails_to_open() {
        let (connector, device) = MockDevice::new();
        device.set_available(false);

        assert!(matches!(connector.open(), Err(Error::DeviceOpen { .. })));

        device.set_available(true);
        assert!(connector.open().is_ok());
    }

    #[tokio::test]
    async fn dropped_session_closes_the_pipe() {
        let (connector, mut device) = MockDevice::new();

        let mut gateway = connector.open().unwrap();
        drop(device.next_session().await);

        let mut buf = Vec::new();
        assert_eq!(gateway.read_to_end(&mut buf).await.unwrap(), 0);
    }
}
