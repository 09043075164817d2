//! Connections to the daemon socket.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use cmdlink_config::SocketEndpoint;
#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

use crate::errors::AppError;

pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

pub(crate) fn connect(endpoint: &SocketEndpoint) -> Result<Connection, AppError> {
    match endpoint {
        SocketEndpoint::Tcp { .. } => {
            let address = endpoint
                .socket_addrs()
                .and_then(|addrs| {
                    addrs.into_iter().next().ok_or_else(|| {
                        io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses")
                    })
                })
                .map_err(|source| AppError::Resolve {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT)
                .map(Connection::Tcp)
                .map_err(|source| AppError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
        }
        #[cfg(unix)]
        SocketEndpoint::Unix { path } => {
            connect_unix(path.as_str()).map_err(|source| AppError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })
        }
        #[cfg(not(unix))]
        SocketEndpoint::Unix { .. } => Err(AppError::UnsupportedUnixTransport(endpoint.to_string())),
    }
}

#[cfg(unix)]
fn connect_unix(path: &str) -> io::Result<Connection> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, CONNECTION_TIMEOUT)?;
    let stream: UnixStream = socket.into();
    Ok(Connection::Unix(stream))
}
