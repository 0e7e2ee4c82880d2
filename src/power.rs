//! Switching the autochanger's power relay.
//!
//! This has nothing to do with the serial link: it is a side effect
//! run on behalf of a client, whose outcome goes back in a reply.

use futures::future::BoxFuture;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::Error;

/// Something able to switch the power on or off.
pub trait PowerControl: Send + Sync + 'static {
    /// The line (e.g. GPIO number) this controls, for `/POWERGPIO`.
    fn line(&self) -> u32;

    /// Switch the power.
    fn set_power(&self, on: bool) -> BoxFuture<'_, Result<(), Error>>;
}

/// Runs an external command to drive a GPIO line.
#[derive(Debug, Clone)]
pub struct GpioShell {
    line: u32,
    template: String,
}

impl GpioShell {
    /// `template` is split on whitespace after substituting `{line}` and `{state}`.
    pub fn new(line: u32, template: &str) -> Self {
        Self {
            line,
            template: template.into(),
        }
    }

    fn command_line(&self, on: bool) -> Vec<String> {
        let state = if on { "1" } else { "0" };

        self.template
            .split_whitespace()
            .map(|part| {
                part.replace("{line}", &self.line.to_string())
                    .replace("{state}", state)
            })
            .collect()
    }

    async fn run(&self, on: bool) -> Result<(), Error> {
        let command_line = self.command_line(on);

        let Some((program, args)) = command_line.split_first() else {
            return Err(Error::PowerControl("The power command is empty".into()));
        };

        debug!(%program, ?args, "Running power command");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::PowerControl(format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::PowerControl(format!(
                "{program} failed with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        info!(line = self.line, on, "Power switched");
        Ok(())
    }
}

impl PowerControl for GpioShell {
    fn line(&self) -> u32 {
        self.line
    }

    fn set_power(&self, on: bool) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(self.run(on))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::DEFAULT_POWER_COMMAND;

    #[test]
    fn template_is_filled_in() {
        let gpio = GpioShell::new(17, DEFAULT_POWER_COMMAND);

        assert_eq!(gpio.command_line(true), ["gpio", "-g", "write", "17", "1"]);
        assert_eq!(gpio.command_line(false), ["gpio", "-g", "write", "17", "0"]);
    }

    #[tokio::test]
    async fn empty_template_fails() {
        let gpio = GpioShell::new(1, "   ");

        assert!(matches!(
            gpio.set_power(true).await,
            Err(Error::PowerControl(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_fails() {
        let gpio = GpioShell::new(1, "this-program-does-not-exist {line} {state}");

        assert!(matches!(
            gpio.set_power(true).await,
            Err(Error::PowerControl(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_decides() {
        assert!(GpioShell::new(1, "true {state}").set_power(true).await.is_ok());
        assert!(GpioShell::new(1, "false {state}").set_power(false).await.is_err());
    }
}
