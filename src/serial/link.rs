//! The device link task.
//!
//! Owns the device connection. Frames it into lines, forwards writes,
//! and reports what happens as [`LinkEvent`]s.
//!
//! When the device goes away unexpectedly (or cannot be opened at start),
//! the reconnection supervisor takes over and retries at a fixed interval
//! until the device is back.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::codec::Decoder;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::serial::{
    codecs::lines::LinesCodec, error::SerialPortError, Connector, DeviceStream, LinkEvent,
};

/// How long to wait between reopen attempts by default.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug)]
enum LinkRequest {
    Write(Vec<u8>),
    Reopen(oneshot::Sender<bool>),
    Shutdown,
}

/// Talks to the device link task.
#[derive(Debug, Clone)]
pub struct DeviceLinkHandle {
    requests: mpsc::UnboundedSender<LinkRequest>,
}

impl DeviceLinkHandle {
    /// Put a command on the wire. The terminator is appended by the codec.
    pub fn write(&self, command: &str) {
        if self
            .requests
            .send(LinkRequest::Write(command.as_bytes().to_vec()))
            .is_err()
        {
            warn!(%command, "Device link is gone, write dropped");
        }
    }

    /// Try to open the device right now, if it is down.
    /// The outcome is sent on `outcome`; `true` if the device is open afterwards.
    pub fn reopen(&self, outcome: oneshot::Sender<bool>) {
        if let Err(mpsc::error::SendError(LinkRequest::Reopen(outcome))) =
            self.requests.send(LinkRequest::Reopen(outcome))
        {
            let _ = outcome.send(false);
        }
    }

    /// Close the device on purpose. No reconnection follows.
    pub fn shutdown(&self) {
        let _ = self.requests.send(LinkRequest::Shutdown);
    }
}

/// Builder for the device link task.
pub struct DeviceLinkBuilder {
    connector: Arc<dyn Connector>,
    retry_interval: Duration,
    line_codec: Option<LinesCodec>,
}

impl DeviceLinkBuilder {
    /// Start a new builder.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            line_codec: None,
        }
    }

    /// Set how long the supervisor waits between attempts.
    pub fn set_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the [`LinesCodec`] to use.
    pub fn set_line_codec(mut self, codec: LinesCodec) -> Self {
        self.line_codec = Some(codec);
        self
    }

    /// Spawn the link task. It immediately tries to open the device.
    #[must_use]
    pub fn build(
        self,
    ) -> (
        DeviceLinkHandle,
        mpsc::UnboundedReceiver<LinkEvent>,
        JoinHandle<()>,
    ) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let span = info_span!("Device", device = %self.connector.describe());

        let link = DeviceLink {
            connector: self.connector,
            retry_interval: self.retry_interval,
            codec: self.line_codec.unwrap_or_default(),
            requests: requests_rx,
            events: events_tx,
        };

        let handle = tokio::spawn(link.run().instrument(span));

        (
            DeviceLinkHandle {
                requests: requests_tx,
            },
            events_rx,
            handle,
        )
    }
}

enum Served {
    Lost(String),
    Shutdown,
}

struct DeviceLink {
    connector: Arc<dyn Connector>,
    retry_interval: Duration,
    codec: LinesCodec,
    requests: mpsc::UnboundedReceiver<LinkRequest>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl DeviceLink {
    async fn run(mut self) {
        while let Some(stream) = self.supervise().await {
            self.emit(LinkEvent::Opened);

            match self.serve(stream).await {
                Served::Lost(reason) => {
                    warn!(%reason, "Device lost");
                    self.emit(LinkEvent::Lost(reason));
                }
                Served::Shutdown => break,
            }
        }

        info!("Device link closed");
        self.emit(LinkEvent::Closed);
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!("Nobody listens to the device link anymore");
        }
    }

    fn try_open(&self) -> Option<DeviceStream> {
        match self.connector.open() {
            Ok(stream) => {
                info!("Device successfully opened");
                Some(stream)
            }
            Err(e) => {
                warn!(%e, "Unable to open the device");
                None
            }
        }
    }

    /// The reconnection supervisor.
    ///
    /// Returns an open device, or `None` if told to shut down first.
    async fn supervise(&mut self) -> Option<DeviceStream> {
        if let Some(stream) = self.try_open() {
            return Some(stream);
        }

        let start = Instant::now();
        let mut retry = time::interval_at(
            start.checked_add(self.retry_interval).unwrap_or(start),
            self.retry_interval,
        );
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.retry_interval, "Retrying until the device is back");

        loop {
            tokio::select! {
                _ = retry.tick() => {
                    if let Some(stream) = self.try_open() {
                        return Some(stream);
                    }
                }
                request = self.requests.recv() => match request {
                    Some(LinkRequest::Reopen(outcome)) => {
                        let stream = self.try_open();
                        let _ = outcome.send(stream.is_some());

                        if stream.is_some() {
                            return stream;
                        }
                    }
                    Some(LinkRequest::Write(bytes)) => {
                        warn!("Device is down, dropping write of {} bytes", bytes.len());
                    }
                    Some(LinkRequest::Shutdown) | None => return None,
                }
            }
        }
    }

    async fn serve(&mut self, stream: DeviceStream) -> Served {
        // Sink: send things to the device, stream: lines from the device
        let (mut sink, mut lines) = self.codec.clone().framed(stream).split();

        loop {
            tokio::select! {
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        trace!("Line from device: `{:?}`", &line[..line.len().min(32)]);
                        self.emit(LinkEvent::Line(line));
                    }
                    Some(Err(e)) => return Served::Lost(e.to_string()),
                    None => return Served::Lost(SerialPortError::Disconnected.to_string()),
                },
                request = self.requests.recv() => match request {
                    Some(LinkRequest::Write(bytes)) => {
                        if let Err(e) = sink.send(bytes).await {
                            return Served::Lost(e.to_string());
                        }
                        trace!("Write flushed");
                    }
                    Some(LinkRequest::Reopen(outcome)) => {
                        let _ = outcome.send(true);
                    }
                    Some(LinkRequest::Shutdown) | None => {
                        if let Err(e) = sink.close().await {
                            debug!(%e, "Problem closing the device");
                        }
                        return Served::Shutdown;
                    }
                }
            }
        }
    }
}
