#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use cac_pivot::{
    actions::Request,
    client::ClientHandle,
    config::Config,
    logging,
    mock::{MockDevice, MockSession},
};
use color_eyre::Result;
use tokio::{sync::oneshot, time::timeout};
use tracing::Level;

pub struct Gateway {
    pub port: u16,
    pub device: MockDevice,
}

impl Gateway {
    pub async fn connect(&self) -> Result<ClientHandle> {
        Ok(ClientHandle::new("127.0.0.1", self.port).await?)
    }

    /// Wait for the gateway to open the mock device.
    pub async fn session(&mut self) -> Result<MockSession> {
        timeout(Duration::from_secs(5), self.device.next_session())
            .await?
            .ok_or_else(|| color_eyre::eyre::eyre!("Mock connector dropped"))
    }
}

pub fn test_config() -> Config {
    Config {
        reconnect_interval_ms: 20,
        ..Default::default()
    }
}

pub async fn start_server() -> Gateway {
    start_server_with_config(test_config()).await
}

pub async fn start_server_with_config(config: Config) -> Gateway {
    logging::init(Level::DEBUG, None).await;

    let (connector, device) = MockDevice::new();
    let (port_tx, port_rx) = oneshot::channel();

    tokio::spawn(async move {
        cac_pivot::server::run_any_port(config, Arc::new(connector), port_tx).await
    });

    let port = port_rx
        .await
        .expect("Server should reply with allocated port");

    Gateway { port, device }
}

/// Start a server, wait for its device to open, and connect one client.
pub async fn start_server_and_connect() -> Result<(Gateway, MockSession, ClientHandle)> {
    let mut gateway = start_server().await;
    let session = gateway.session().await?;
    let mut client = gateway.connect().await?;

    wait_for_health(&mut client, true).await?;

    Ok((gateway, session, client))
}

pub async fn wait_for_health(client: &mut ClientHandle, healthy: bool) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        loop {
            let reply = client.request(&Request::new("/SERIALOK")).await?;
            if reply.result == healthy.into() {
                return Ok::<_, color_eyre::Report>(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?
}
