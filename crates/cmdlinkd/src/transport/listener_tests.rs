//! Tests for the socket listener.

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use cmdlink_config::SocketEndpoint;
use rstest::{fixture, rstest};

use super::{ConnectionHandler, ConnectionStream, ListenerError, SocketListener};

struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, _stream: ConnectionStream) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[fixture]
fn counter() -> (Arc<AtomicUsize>, Arc<dyn ConnectionHandler>) {
    let count = Arc::new(AtomicUsize::new(0));
    let handler: Arc<dyn ConnectionHandler> = Arc::new(CountingHandler {
        count: Arc::clone(&count),
    });
    (count, handler)
}

fn wait_for_count(count: &AtomicUsize, expected: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if count.load(Ordering::SeqCst) >= expected {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[rstest]
fn tcp_listener_accepts_connections(counter: (Arc<AtomicUsize>, Arc<dyn ConnectionHandler>)) {
    let (count, handler) = counter;
    let listener =
        SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind tcp listener");
    let addr = listener
        .local_addr()
        .expect("listener should report local address");
    let handle = listener.start(handler).expect("start listener");

    TcpStream::connect(addr).expect("connect first client");
    TcpStream::connect(addr).expect("connect second client");

    assert!(wait_for_count(&count, 2), "expected two connections");
    handle.shutdown();
    handle.join().expect("join listener");
}

#[test]
fn unresolvable_host_is_reported() {
    let error = SocketListener::bind(&SocketEndpoint::tcp("cmdlink.invalid", 9779))
        .expect_err("host should not resolve");
    assert!(matches!(
        error,
        ListenerError::Resolve { .. } | ListenerError::ResolveEmpty { .. }
    ));
}

#[cfg(unix)]
mod unix {
    use std::os::unix::net::{UnixListener, UnixStream};

    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn socket_dir() -> TempDir {
        tempfile::tempdir().expect("temp dir")
    }

    fn socket_path(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("cmdlinkd.sock")).expect("utf8 temp dir")
    }

    #[rstest]
    fn cleans_stale_socket_files(
        socket_dir: TempDir,
        counter: (Arc<AtomicUsize>, Arc<dyn ConnectionHandler>),
    ) {
        let (count, handler) = counter;
        let path = socket_path(&socket_dir);
        drop(UnixListener::bind(&path).expect("bind stale listener"));
        assert!(path.exists(), "stale socket should remain");

        let listener = SocketListener::bind(&SocketEndpoint::unix(path.clone()))
            .expect("bind over stale socket");
        let handle = listener.start(handler).expect("start listener");
        UnixStream::connect(&path).expect("connect unix client");
        assert!(wait_for_count(&count, 1), "expected one connection");

        handle.shutdown();
        handle.join().expect("join listener");
        assert!(!path.exists(), "listener should remove its socket on shutdown");
    }

    #[rstest]
    fn rejects_socket_in_use(socket_dir: TempDir) {
        let path = socket_path(&socket_dir);
        let _live = UnixListener::bind(&path).expect("bind live listener");

        let error =
            SocketListener::bind(&SocketEndpoint::unix(path)).expect_err("socket is in use");
        assert!(matches!(error, ListenerError::UnixInUse { .. }));
    }

    #[rstest]
    fn refuses_to_replace_regular_files(socket_dir: TempDir) {
        let path = socket_path(&socket_dir);
        std::fs::write(&path, b"not a socket").expect("write file");

        let error =
            SocketListener::bind(&SocketEndpoint::unix(path.clone())).expect_err("not a socket");
        assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
        assert!(path.exists(), "regular file must survive");
    }
}
