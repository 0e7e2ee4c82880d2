use std::{
    net::{SocketAddr, TcpListener},
    sync::Arc,
};

use axum::{routing::get, Extension, Router};
use axum_server::tls_rustls::RustlsConfig;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tracing::{info, warn};

use crate::{
    config::Config,
    control_center::ControlCenterHandle,
    error::StartupError,
    peer::GatewayInfo,
    power::{GpioShell, PowerControl},
    serial::{link::DeviceLinkBuilder, serial_port::SerialConnector, Connector},
    user::ConnectionIds,
    websocket,
};

/// The host name of this machine, as well as it can be found.
pub fn hostname() -> String {
    #[cfg(unix)]
    {
        nix::unistd::gethostname()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".into())
    }

    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".into())
    }
}

fn bind(port: u16) -> Result<TcpListener, StartupError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = TcpListener::bind(addr)
        .map_err(|e| StartupError::Bind(format!("port {port}: {e}")))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| StartupError::Bind(e.to_string()))?;

    Ok(listener)
}

async fn run(
    config: Config,
    connector: Arc<dyn Connector>,
    port: u16,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), StartupError> {
    config.validate().map_err(StartupError::Config)?;

    info!(
        "Instance: {} - {}, device: {}, timeout: {}s, password: {}, TLS: {}",
        config.id,
        config.description,
        connector.describe(),
        config.timeout_secs,
        if config.requires_password() { "enabled" } else { "disabled" },
        if config.tls.enabled { "enabled" } else { "disabled" },
    );

    // Fail on bad TLS material before touching anything else.
    let tls = if config.tls.enabled {
        if !config.tls.passphrase.is_empty() {
            warn!("Encrypted private keys are not supported, the passphrase is ignored");
        }

        let tls = RustlsConfig::from_pem_file(config.tls.cert_path(), config.tls.key_path())
            .await
            .map_err(StartupError::Tls)?;
        Some(tls)
    } else {
        None
    };

    let listener = bind(port)?;
    let addr = listener
        .local_addr()
        .map_err(|e| StartupError::Bind(e.to_string()))?;

    let (link, link_events, _) = DeviceLinkBuilder::new(connector)
        .set_retry_interval(config.reconnect_interval())
        .build();

    let cc_handle = ControlCenterHandle::new(link, link_events, config.timeout());

    let power = config
        .power_gpio
        .map(|line| Arc::new(GpioShell::new(line, &config.power_command)) as Arc<dyn PowerControl>);

    let info = Arc::new(GatewayInfo {
        started: chrono::Utc::now(),
        hostname: hostname(),
        power,
        config,
    });

    let app = Router::new().route("/", get(websocket::ws_handler)).layer(
        ServiceBuilder::new()
            // Each websocket needs to be able to reach the control center
            .layer(Extension(cc_handle))
            .layer(Extension(info))
            .layer(Extension(Arc::new(ConnectionIds::default()))),
    );

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("Nobody wanted to know the allocated port");
        }
    }

    info!("listening on {}", addr);

    match tls {
        Some(tls) => axum_server::from_tcp_rustls(listener, tls)
            .serve(app.into_make_service())
            .await
            .map_err(|e| StartupError::Bind(e.to_string())),
        None => axum::Server::from_tcp(listener)
            .map_err(|e| StartupError::Bind(e.to_string()))?
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|e| StartupError::Bind(e.to_string())),
    }
}

/// Start the gateway on an arbitrary available port, talking to the given device.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(
    config: Config,
    connector: Arc<dyn Connector>,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), StartupError> {
    run(config, connector, 0, Some(allocated_port)).await
}

/// Start the gateway on the configured port, talking to the configured serial device.
pub async fn run_on_port(config: Config) -> Result<(), StartupError> {
    let connector =
        SerialConnector::new(&config.serial, config.baud).map_err(StartupError::DeviceLink)?;
    let port = config.port;

    run(config, Arc::new(connector), port, None).await
}
