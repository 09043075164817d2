use std::fmt;
use std::fs::DirBuilder;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Address of the daemon socket, written as `unix:///path` or
/// `tcp://host:port`.
///
/// Serialises as the same URL text it parses from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum SocketEndpoint {
    /// Unix domain socket.
    Unix {
        /// Filesystem path of the socket.
        path: Utf8PathBuf,
    },
    /// TCP socket.
    Tcp {
        /// Host name or IP address.
        host: String,
        /// TCP port.
        port: u16,
    },
}

impl SocketEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP socket endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Returns the socket path of a Unix endpoint.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Resolves a TCP endpoint to socket addresses.
    ///
    /// # Errors
    ///
    /// Fails for Unix endpoints and when name resolution fails.
    pub fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        match self {
            Self::Tcp { host, port } => Ok((host.as_str(), *port).to_socket_addrs()?.collect()),
            Self::Unix { path } => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unix socket {path} has no network address"),
            )),
        }
    }

    /// Creates the parent directory of a Unix socket, readable only by the
    /// current user. TCP endpoints need no preparation.
    ///
    /// # Errors
    ///
    /// Fails when the path has no parent or the directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .ok_or_else(|| SocketPreparationError::MissingParent {
                path: path.to_path_buf(),
            })?;

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        builder
            .create(parent.as_std_path())
            .map_err(|source| SocketPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(SocketParseError::MissingUnixPath(input.to_owned()));
                }
                Ok(Self::unix(path))
            }
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| SocketParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host.trim_matches(['[', ']']), port))
            }
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

impl TryFrom<String> for SocketEndpoint {
    type Error = SocketParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SocketEndpoint> for String {
    fn from(endpoint: SocketEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Errors raised while parsing a [`SocketEndpoint`].
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Only `unix` and `tcp` are understood.
    #[error("unsupported socket scheme '{0}'")]
    UnsupportedScheme(String),
    /// A TCP endpoint named no host.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// A TCP endpoint named no port.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// A Unix endpoint named no path.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// The text is not a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised while creating the socket directory.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// The socket path has no parent directory.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent {
        /// Socket path as configured.
        path: Utf8PathBuf,
    },
    /// The parent directory could not be created.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO failure.
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[rstest]
    #[case("unix:///run/user/1000/cmdlink/cmdlinkd.sock", SocketEndpoint::unix("/run/user/1000/cmdlink/cmdlinkd.sock"))]
    #[case("tcp://127.0.0.1:9779", SocketEndpoint::tcp("127.0.0.1", 9779))]
    #[case("tcp://localhost:4000", SocketEndpoint::tcp("localhost", 4000))]
    #[case("tcp://[::1]:4000", SocketEndpoint::tcp("::1", 4000))]
    fn parses_endpoints(#[case] input: &str, #[case] expected: SocketEndpoint) {
        assert_eq!(input.parse::<SocketEndpoint>().expect("valid endpoint"), expected);
    }

    #[rstest]
    #[case("udp://127.0.0.1:9779")]
    #[case("tcp://127.0.0.1")]
    #[case("unix://")]
    #[case("not a url")]
    fn rejects_invalid_endpoints(#[case] input: &str) {
        assert!(input.parse::<SocketEndpoint>().is_err(), "{input} should fail");
    }

    #[test]
    fn display_matches_parse_input() {
        let text = "unix:///tmp/cmdlink/cmdlinkd.sock";
        let endpoint: SocketEndpoint = text.parse().expect("valid endpoint");
        assert_eq!(endpoint.to_string(), text);
    }

    #[test]
    fn tcp_endpoint_resolves_addresses() {
        let addrs = SocketEndpoint::tcp("127.0.0.1", 9779)
            .socket_addrs()
            .expect("resolve loopback");
        assert_eq!(addrs, vec![SocketAddr::from(([127, 0, 0, 1], 9779))]);
        assert!(SocketEndpoint::unix("/tmp/x.sock").socket_addrs().is_err());
    }

    #[test]
    fn prepare_filesystem_creates_private_parent() {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8 temp dir");
        let endpoint = SocketEndpoint::unix(root.join("nested/dir/cmdlinkd.sock"));

        endpoint.prepare_filesystem().expect("prepare");
        endpoint.prepare_filesystem().expect("prepare twice");

        let parent = root.join("nested/dir");
        assert!(parent.is_dir());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&parent).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn prepare_filesystem_rejects_bare_file_name() {
        let error = SocketEndpoint::unix("cmdlinkd.sock")
            .prepare_filesystem()
            .expect_err("no parent");
        assert!(matches!(error, SocketPreparationError::MissingParent { .. }));
    }
}
