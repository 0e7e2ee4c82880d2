use cac_pivot::{cli, config::Config, error::StartupError, logging, server};
use clap::Parser;
use color_eyre::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info};

fn load_config(cli: &cli::Cli) -> Result<Config, StartupError> {
    let mut config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path).map_err(StartupError::Config)?
    } else {
        Config::default()
    };

    config.apply_process_env().map_err(StartupError::Config)?;

    Ok(config)
}

#[cfg(unix)]
async fn terminated() -> Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C, quitting"),
        _ = hangup.recv() => info!("Told to hang up, quitting"),
        _ = terminate.recv() => info!("SIGTERM received, quitting"),
    }

    Ok(())
}

#[cfg(not(unix))]
async fn terminated() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C, quitting");

    Ok(())
}

fn exit_with(e: StartupError) -> ! {
    error!("{e}");
    eprintln!("{e}");
    std::process::exit(e.exit_code());
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let mut cli = cli::Cli::parse();

    if let Some(command) = cli.command.take() {
        cli::handle_command(command);

        return Ok(());
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => exit_with(e),
    };

    let (stdout_level, file_logging) = logging::levels(config.debug, config.log_dir.clone());
    logging::init(stdout_level, file_logging).await;

    info!("Starting cac-pivot {}", env!("CARGO_PKG_VERSION"));

    tokio::select! {
        signal = terminated() => signal?,
        outcome = server::run_on_port(config) => match outcome {
            Ok(()) => {
                error!("Server returned");
                return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
            }
            Err(e) => exit_with(e),
        }
    }

    info!("Good bye!");

    Ok(())
}
