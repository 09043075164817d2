//! Error types for the CLI runtime.

use std::io;

use cmdlink::ErrInfo;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to resolve daemon address {endpoint}: {source}")]
    Resolve { endpoint: String, source: io::Error },
    #[error("failed to connect to daemon at {endpoint}: {source}")]
    Connect { endpoint: String, source: io::Error },
    #[cfg(not(unix))]
    #[error("platform does not support Unix sockets: {0}")]
    UnsupportedUnixTransport(String),
    #[error("command {command} failed with code {}: {}", .error.code(), .error.message())]
    Command { command: String, error: ErrInfo },
    #[error("reply to {command} is not valid JSON: {source}")]
    ParseReply {
        command: String,
        source: serde_json::Error,
    },
    #[error("failed to write output: {0}")]
    WriteOutput(#[from] io::Error),
}

impl AppError {
    /// Whether the daemon looks absent rather than broken.
    pub(crate) fn is_daemon_not_running(&self) -> bool {
        match self {
            Self::Connect { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::NotFound
                    | io::ErrorKind::AddrNotAvailable
            ),
            _ => false,
        }
    }
}
