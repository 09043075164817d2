//! Configuration shared by the `cmdlinkd` daemon and the `cmdlink` CLI.
//!
//! Both binaries agree on where the daemon socket lives and how the daemon
//! logs. Values come from three layers, highest precedence first:
//!
//! 1. command-line flags (`--daemon-socket`, `--log-filter`, `--log-format`);
//! 2. environment variables (`CMDLINK_DAEMON_SOCKET`, `CMDLINK_LOG_FILTER`,
//!    `CMDLINK_LOG_FORMAT`);
//! 3. the built-in defaults in [`defaults`].

mod defaults;
mod logging;
mod socket;

use std::ffi::OsString;

use clap::{Args, Parser};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_TCP_PORT, SOCKET_DIRECTORY, SOCKET_FILE_NAME, default_log_filter,
    default_log_format, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Socket the daemon binds and the CLI connects to.
    pub daemon_socket: SocketEndpoint,
    /// `tracing` filter directive for the daemon.
    pub log_filter: String,
    /// Output format of the daemon's logs.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a flag or variable holds an invalid value.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Loads configuration from `args` (program name first) and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a flag or variable holds an invalid value.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = ConfigCli::try_parse_from(args)?;
        Ok(cli.overrides.resolve())
    }

    /// Socket the daemon binds and the CLI connects to.
    #[must_use]
    pub const fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// `tracing` filter directive for the daemon.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format of the daemon's logs.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Configuration flags, for flattening into a binary's own argument parser.
///
/// Each flag falls back to its `CMDLINK_*` environment variable; anything
/// still unset takes the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args)]
pub struct ConfigOverrides {
    /// Daemon socket, as `unix:///path` or `tcp://host:port`.
    #[arg(long, env = "CMDLINK_DAEMON_SOCKET", value_name = "ENDPOINT", global = true)]
    pub daemon_socket: Option<SocketEndpoint>,
    /// Log filter directive, for example `info` or `cmdlink=debug`.
    #[arg(long, env = "CMDLINK_LOG_FILTER", value_name = "FILTER", global = true)]
    pub log_filter: Option<String>,
    /// Log format: `json` or `compact`.
    #[arg(long, env = "CMDLINK_LOG_FORMAT", value_name = "FORMAT", global = true)]
    pub log_format: Option<LogFormat>,
}

impl ConfigOverrides {
    /// Applies the overrides on top of the defaults.
    #[must_use]
    pub fn resolve(self) -> Config {
        let defaults = Config::default();
        Config {
            daemon_socket: self.daemon_socket.unwrap_or(defaults.daemon_socket),
            log_filter: self.log_filter.unwrap_or(defaults.log_filter),
            log_format: self.log_format.unwrap_or(defaults.log_format),
        }
    }
}

#[derive(Debug, Parser)]
#[command(about = "cmdlink daemon configuration")]
struct ConfigCli {
    #[command(flatten)]
    overrides: ConfigOverrides,
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A flag or environment variable was invalid, or help was requested.
    #[error(transparent)]
    Arguments(#[from] clap::Error),
}

impl ConfigError {
    /// Returns the argument error, for callers that want clap's rendering.
    #[must_use]
    pub const fn as_clap(&self) -> &clap::Error {
        match self {
            Self::Arguments(error) => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_apply_without_overrides() {
        let config = ConfigOverrides::default().resolve();
        assert_eq!(config, Config::default());
        assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[rstest]
    #[case(&["cmdlinkd", "--daemon-socket", "tcp://127.0.0.1:4100"], SocketEndpoint::tcp("127.0.0.1", 4100))]
    #[case(&["cmdlinkd", "--daemon-socket=unix:///tmp/c.sock"], SocketEndpoint::unix("/tmp/c.sock"))]
    fn flags_override_socket(#[case] args: &[&str], #[case] expected: SocketEndpoint) {
        let config = Config::load_from_iter(args).expect("load");
        assert_eq!(config.daemon_socket(), &expected);
    }

    #[test]
    fn flags_override_logging() {
        let config = Config::load_from_iter([
            "cmdlinkd",
            "--log-filter",
            "cmdlink=trace",
            "--log-format",
            "compact",
        ])
        .expect("load");
        assert_eq!(config.log_filter(), "cmdlink=trace");
        assert_eq!(config.log_format(), LogFormat::Compact);
    }

    #[test]
    fn invalid_socket_is_rejected() {
        let error = Config::load_from_iter(["cmdlinkd", "--daemon-socket", "udp://x:1"])
            .expect_err("invalid socket");
        assert_eq!(error.as_clap().kind(), clap::error::ErrorKind::ValueValidation);
    }
}
