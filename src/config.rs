//! Relay configuration.
//!
//! The listening port (and optionally host) comes from the command line;
//! tunables come from environment variables (or a `.env` file via
//! `dotenvy`). Missing or unparsable tunables fall back to defaults.

use std::time::Duration;

use crate::error::RelayError;

/// Default host the relay binds to.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default reserved disconnect token.
pub const DEFAULT_EXIT_COMMAND: &str = "/exit";

/// Top-level relay configuration.
///
/// Built once at startup and shared by reference with every worker.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host or IP address to bind the listener to.
    pub host: String,

    /// TCP port to bind. `0` asks the OS for an ephemeral port.
    pub port: u16,

    /// Upper bound on a single peer write (line + flush).
    pub write_timeout: Duration,

    /// Upper bound on receiving the display-name line after accept.
    pub handshake_timeout: Duration,

    /// Longest inbound line accepted, excluding the terminator.
    pub max_line_bytes: usize,

    /// Line that ends a session when sent by a client.
    pub exit_command: String,
}

impl RelayConfig {
    /// Creates a configuration with default tunables.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            write_timeout: Duration::from_millis(5_000),
            handshake_timeout: Duration::from_millis(30_000),
            max_line_bytes: 64 * 1024,
            exit_command: DEFAULT_EXIT_COMMAND.to_string(),
        }
    }

    /// Loads tunables from the environment on top of the given address.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the resulting configuration is
    /// unusable (see [`RelayConfig::validate`]).
    pub fn from_env(host: impl Into<String>, port: u16) -> Result<Self, RelayError> {
        dotenvy::dotenv().ok();

        let defaults = Self::new(host, port);
        let config = Self {
            write_timeout: Duration::from_millis(parse_env(
                "RELAY_WRITE_TIMEOUT_MS",
                millis(defaults.write_timeout),
            )),
            handshake_timeout: Duration::from_millis(parse_env(
                "RELAY_HANDSHAKE_TIMEOUT_MS",
                millis(defaults.handshake_timeout),
            )),
            max_line_bytes: parse_env("RELAY_MAX_LINE_BYTES", defaults.max_line_bytes),
            exit_command: std::env::var("RELAY_EXIT_COMMAND")
                .unwrap_or_else(|_| defaults.exit_command.clone()),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every tunable is usable.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] for a zero timeout, a zero line
    /// limit, or an empty exit command.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.write_timeout.is_zero() {
            return Err(RelayError::Config("write timeout must be positive".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(RelayError::Config("handshake timeout must be positive".into()));
        }
        if self.max_line_bytes == 0 {
            return Err(RelayError::Config("max line bytes must be positive".into()));
        }
        if self.exit_command.trim().is_empty() {
            return Err(RelayError::Config("exit command must not be empty".into()));
        }
        Ok(())
    }

    /// Returns the `host:port` string handed to the listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
