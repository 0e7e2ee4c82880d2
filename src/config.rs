use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The command run to switch the power relay.
/// `{line}` is replaced by the GPIO line number, `{state}` by `1` or `0`.
pub const DEFAULT_POWER_COMMAND: &str = "gpio -g write {line} {state}";

/// The longest device timeout accepted, one day.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// The longest reconnect interval accepted, one day.
pub const MAX_RECONNECT_INTERVAL_MS: u64 = MAX_TIMEOUT_SECS * 1000;

/// TLS settings for the websocket listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Serve `wss://` instead of `ws://`.
    pub enabled: bool,

    /// The directory holding the certificate and the private key.
    pub dir: PathBuf,

    /// Certificate file name (PEM), relative to `dir`.
    pub cert: String,

    /// Private key file name (PEM), relative to `dir`.
    pub key: String,

    /// Passphrase of the private key.
    pub passphrase: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("/opt/cccpivot/"),
            cert: "cert.pem".into(),
            key: "key.pem".into(),
            passphrase: "cccpivot".into(),
        }
    }
}

impl TlsConfig {
    /// Full path to the certificate.
    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(&self.cert)
    }

    /// Full path to the private key.
    pub fn key_path(&self) -> PathBuf {
        self.dir.join(&self.key)
    }
}

/// The configuration used for running the gateway.
///
/// Starts from defaults, optionally overlaid by a RON file,
/// then by `CCC*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Unique name of this instance. Answered by `/JID`.
    pub id: String,

    /// Free text description. Answered by `/DESC`.
    pub description: String,

    /// Websocket listening port.
    pub port: u16,

    /// The serial device, e.g. `/dev/ttyUSB0` or `COM3`.
    pub serial: String,

    /// Serial speed, typically 4800 or 9600.
    pub baud: u32,

    /// Trace all client activity.
    pub debug: bool,

    /// How long to wait for the device to answer a command, in seconds.
    pub timeout_secs: u64,

    /// If non-empty, clients must send `/PASS` before device commands.
    pub password: String,

    /// Autochanger model identifier.
    pub model: String,

    /// Left player identifier.
    pub left_player_id: u32,

    /// The GPIO line driving the power relay, if there is one.
    pub power_gpio: Option<u32>,

    /// Command template for switching the power relay.
    pub power_command: String,

    /// Transport security.
    pub tls: TlsConfig,

    /// If set, logs are also written to daily files in this directory.
    pub log_dir: Option<PathBuf>,

    /// How long to wait between attempts to reopen a lost device, in milliseconds.
    pub reconnect_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: "ac0".into(),
            description: "No description".into(),
            port: 8000,
            serial: "/dev/ttyUSB0".into(),
            baud: 9600,
            debug: false,
            timeout_secs: 10,
            password: String::new(),
            model: String::new(),
            left_player_id: 1,
            power_gpio: None,
            power_command: DEFAULT_POWER_COMMAND.into(),
            tls: TlsConfig::default(),
            log_dir: None,
            reconnect_interval_ms: 1000,
        }
    }
}

fn parse_number<T: FromStr>(variable: &str, value: &str) -> Result<T, Error> {
    value.trim().parse().map_err(|_| {
        Error::BadConfig(format!(
            "`{variable}` should be a non-negative number, got `{value}`"
        ))
    })
}

fn parse_flag(variable: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::BadConfig(format!(
            "`{variable}` should be 1 or 0, got `{value}`"
        ))),
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not a valid configuration: {e}")))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("Could not read {path:?}: {e}")))?;

        Self::deserialize(&s)
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            id: "ac1".into(),
            description: "Left rack, upper changer".into(),
            serial: "/dev/ttyUSB1".into(),
            password: "secret".into(),
            model: "V5000".into(),
            power_gpio: Some(17),
            log_dir: Some("/var/log/cccpivot".into()),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap_or_else(|e| format!("Unable to serialize the configuration: {e}"))
    }

    /// Overlay the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), Error> {
        self.apply_env(std::env::vars())
    }

    /// Overlay `CCC*` variables. Unknown variables are ignored.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());

            match key {
                "CCCID" => self.id = value.into(),
                "CCCDESC" => self.description = value.into(),
                "CCCWSSPORT" => self.port = parse_number(key, value)?,
                "CCCSERIAL" => self.serial = value.into(),
                "CCCBAUDS" => self.baud = parse_number(key, value)?,
                "CCCDEBUG" => self.debug = parse_flag(key, value)?,
                "CCCTIMEOUT" => self.timeout_secs = parse_number(key, value)?,
                "CCCPASS" => self.password = value.into(),
                "CCCMODEL" => self.model = value.into(),
                "CCCLPID" => self.left_player_id = parse_number(key, value)?,
                "CCCGPIO" if value.trim().is_empty() => self.power_gpio = None,
                "CCCGPIO" => self.power_gpio = Some(parse_number(key, value)?),
                "CCCGPIOCMD" => self.power_command = value.into(),
                "CCCSSL" => self.tls.enabled = parse_flag(key, value)?,
                "CCCSSLDIR" => self.tls.dir = value.into(),
                "CCCSSLCERT" => self.tls.cert = value.into(),
                "CCCSSLKEY" => self.tls.key = value.into(),
                "CCCPASSPHR" => self.tls.passphrase = value.into(),
                "CCCLOGDIR" if value.trim().is_empty() => self.log_dir = None,
                "CCCLOGDIR" => self.log_dir = Some(value.into()),
                _ => {}
            }
        }

        Ok(())
    }

    /// The device reply timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay between reopen attempts of a lost device.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Whether clients must authenticate.
    pub fn requires_password(&self) -> bool {
        !self.password.is_empty()
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.timeout_secs == 0 {
            return Err(Error::BadConfig(
                "The device timeout must be at least one second".into(),
            ));
        }

        if self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::BadConfig(format!(
                "The device timeout must be at most {MAX_TIMEOUT_SECS} seconds"
            )));
        }

        if self.serial.trim().is_empty() {
            return Err(Error::BadConfig("The serial port path is empty".into()));
        }

        if self.reconnect_interval_ms == 0 {
            return Err(Error::BadConfig(
                "The reconnect interval must be positive".into(),
            ));
        }

        if self.reconnect_interval_ms > MAX_RECONNECT_INTERVAL_MS {
            return Err(Error::BadConfig(format!(
                "The reconnect interval must be at most {MAX_RECONNECT_INTERVAL_MS}ms"
            )));
        }

        if self.power_gpio.is_some() && self.power_command.trim().is_empty() {
            return Err(Error::BadConfig(
                "A power GPIO line is set but the power command is empty".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn serialize() {
        let c = Config::example();

        println!("{}", c.serialize_pretty());
    }

    #[test]
    fn pretty_output_reads_back() {
        let c = Config::example();

        assert_eq!(Config::deserialize(&c.serialize_pretty()).unwrap(), c);
    }

    #[test]
    fn deserialize_partial() {
        let input = r#"
(
    id: "ac7",
    serial: "COM3",
    power_gpio: 4,
    tls: (
        enabled: true,
    ),
)
"#;
        let c = Config::deserialize(input).unwrap();

        assert_eq!(c.id, "ac7");
        assert_eq!(c.serial, "COM3");
        assert_eq!(c.power_gpio, Some(4));
        assert!(c.tls.enabled);
        assert_eq!(c.tls.cert, "cert.pem");
        assert_eq!(c.port, 8000);
    }

    #[test]
    fn env_overrides() {
        let mut c = Config::default();

        c.apply_env([
            ("CCCID", "ac3"),
            ("CCCWSSPORT", "9001"),
            ("CCCBAUDS", "4800"),
            ("CCCDEBUG", "1"),
            ("CCCTIMEOUT", "3"),
            ("CCCPASS", "pw"),
            ("CCCGPIO", "17"),
            ("CCCSSL", "1"),
            ("CCCSSLDIR", "/etc/tls"),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert_eq!(c.id, "ac3");
        assert_eq!(c.port, 9001);
        assert_eq!(c.baud, 4800);
        assert!(c.debug);
        assert_eq!(c.timeout(), Duration::from_secs(3));
        assert!(c.requires_password());
        assert_eq!(c.power_gpio, Some(17));
        assert!(c.tls.enabled);
        assert_eq!(c.tls.cert_path(), PathBuf::from("/etc/tls/cert.pem"));
    }

    #[test]
    fn unparsable_numbers_are_bad() {
        let mut c = Config::default();

        let problem = c
            .apply_env([("CCCWSSPORT", "eighty")])
            .unwrap_err()
            .try_into_bad_config()
            .unwrap();

        assert!(problem.contains("CCCWSSPORT"));
    }

    #[test]
    fn unparsable_flags_are_bad() {
        let mut c = Config::default();

        assert!(c.apply_env([("CCCSSL", "maybe")]).is_err());
    }

    #[test]
    fn huge_timeouts_are_rejected() {
        let mut c = Config::default();
        c.apply_env([("CCCTIMEOUT", "18446744073709551615")]).unwrap();
        assert!(c.validate().is_err());

        c.timeout_secs = MAX_TIMEOUT_SECS;
        assert!(c.validate().is_ok());

        c.reconnect_interval_ms = u64::MAX;
        assert!(c.validate().is_err());
    }

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::example().validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_bad() {
        let c = Config {
            timeout_secs: 0,
            ..Default::default()
        };

        assert!(c.validate().is_err());
    }

    #[test]
    fn empty_serial_is_bad() {
        let c = Config {
            serial: "".into(),
            ..Default::default()
        };

        assert!(c.validate().is_err());
    }
}
