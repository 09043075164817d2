use camino::Utf8PathBuf;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Port the daemon listens on where Unix sockets are unavailable.
pub const DEFAULT_TCP_PORT: u16 = 9779;

/// Log filter applied when none is configured.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Directory under the runtime directory that holds the daemon socket.
pub const SOCKET_DIRECTORY: &str = "cmdlink";

/// File name of the daemon socket.
pub const SOCKET_FILE_NAME: &str = "cmdlinkd.sock";

/// Log filter applied when none is configured.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Log format applied when none is configured.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Socket the daemon binds and the CLI connects to by default.
///
/// On Unix this is `$XDG_RUNTIME_DIR/cmdlink/cmdlinkd.sock`. Without a
/// runtime directory the socket moves under the temporary directory, in a
/// per-user `uid-<euid>` namespace so users do not collide.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    #[cfg(unix)]
    {
        let mut base = match runtime_base_directory() {
            Some(dir) => dir,
            None => {
                let mut dir = temp_base_directory();
                dir.push(SOCKET_DIRECTORY);
                dir.push(user_namespace());
                return SocketEndpoint::unix(dir.join(SOCKET_FILE_NAME));
            }
        };
        base.push(SOCKET_DIRECTORY);
        SocketEndpoint::unix(base.join(SOCKET_FILE_NAME))
    }

    #[cfg(not(unix))]
    {
        SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
    }
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn temp_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn default_socket_is_a_unix_socket_named_for_the_daemon() {
        let endpoint = default_socket_endpoint();
        let path = endpoint.unix_path().expect("unix socket on unix hosts");
        assert_eq!(path.file_name(), Some(SOCKET_FILE_NAME));
        assert!(
            path.components().any(|part| part.as_str() == SOCKET_DIRECTORY),
            "unexpected socket path {path}"
        );
    }
}
