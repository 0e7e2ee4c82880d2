use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use tungstenite::Message;

use crate::{
    actions::{Reply, Request},
    error::Error,
};

/// How long [`ClientHandle`] waits for a reply by default.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// A websocket client for the gateway.
pub struct ClientHandle {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    timeout: Duration,
}

impl ClientHandle {
    /// Connect to a gateway serving plain websockets.
    pub async fn new(address: &str, port: u16) -> Result<Self, Error> {
        Self::connect(&format!("ws://{address}:{port}/")).await
    }

    /// Connect to the given `ws://` or `wss://` url.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        info!("Connecting to {url}");
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;

        Ok(Self {
            stream,
            timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    /// Change how long to wait for replies.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request. Replies arrive separately, see [`Self::next_reply`].
    pub async fn send(&mut self, request: &Request) -> Result<(), Error> {
        self.send_text(request.serialize()).await
    }

    /// Send any text, valid request or not.
    pub async fn send_text(&mut self, text: String) -> Result<(), Error> {
        debug!(%text, "Sending");
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    /// The next reply or broadcast, whatever it is.
    pub async fn next_reply(&mut self) -> Result<Reply, Error> {
        loop {
            let message = tokio::time::timeout(self.timeout, self.stream.next())
                .await
                .map_err(|_| Error::NoReply(self.timeout))?
                .ok_or(Error::Websocket(tungstenite::Error::ConnectionClosed))??;

            match message {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Binary(bytes) => return Ok(serde_json::from_slice(&bytes)?),
                other => debug!("Skipping {other:?}"),
            }
        }
    }

    /// The next reply about `command`, skipping anything else (e.g. broadcasts).
    pub async fn next_reply_for(&mut self, command: &str) -> Result<Reply, Error> {
        loop {
            let reply = self.next_reply().await?;

            if reply.command == command {
                return Ok(reply);
            }
            debug!("Skipping {reply}");
        }
    }

    /// Send a request and wait for the reply about the same command.
    ///
    /// Only meaningful for requests carrying a single command.
    pub async fn request(&mut self, request: &Request) -> Result<Reply, Error> {
        self.send(request).await?;

        let command = request
            .command
            .as_deref()
            .map(crate::actions::normalize_command)
            .unwrap_or_default();

        self.next_reply_for(&command).await
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), Error> {
        self.stream.close(None).await?;
        Ok(())
    }
}
