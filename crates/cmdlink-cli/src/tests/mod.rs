//! Tests running the CLI against an in-process daemon listener.


use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use cmdlink::{
    CommandContext, CommandName, CommandRegistry, Dispatcher, ExchangeData, MessageStream,
    commands,
};
use cmdlink_config::SocketEndpoint;
use cmdlinkd::transport::{DispatchConnectionHandler, ListenerHandle, SocketListener};
use cmdlinkd::{ShellList, register_builtins};
use rstest::{fixture, rstest};
use tempfile::NamedTempFile;

use crate::run;

/// Daemon listener on a loopback port, stopped on drop.
pub(crate) struct TestDaemon {
    endpoint: SocketEndpoint,
    handle: Option<ListenerHandle>,
    _shells: NamedTempFile,
}

impl TestDaemon {
    pub(crate) fn start() -> Self {
        let mut shells = NamedTempFile::new().expect("shells file");
        writeln!(shells, "# test shells\n/bin/sh\n/bin/bash").expect("write shells");

        let registry = CommandRegistry::new();
        register_builtins(&registry);
        registry.register_handler(
            commands::SYSTEM_SHELL_LIST,
            Arc::new(ShellList::new(shells.path())),
        );
        registry.register(
            CommandName::from_static("/echo"),
            |_stream: &mut dyn MessageStream, context: &CommandContext| {
                Ok(context.initial().clone())
            },
        );
        registry.register(
            CommandName::from_static("/status"),
            |_stream: &mut dyn MessageStream, _context: &CommandContext| {
                Ok(ExchangeData::from_text(r#"{"ready":true,"commands":4}"#))
            },
        );

        let listener =
            SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind listener");
        let address = listener.local_addr().expect("listener address");
        let handler = Arc::new(DispatchConnectionHandler::new(Dispatcher::new(Arc::new(
            registry,
        ))));
        let handle = listener.start(handler).expect("start listener");
        Self {
            endpoint: SocketEndpoint::tcp(address.ip().to_string(), address.port()),
            handle: Some(handle),
            _shells: shells,
        }
    }

    pub(crate) fn socket_flag(&self) -> String {
        format!("--daemon-socket={}", self.endpoint)
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
            handle.join().expect("join listener");
        }
    }
}

/// Captured result of one CLI run.
pub(crate) struct Outcome {
    pub(crate) code: ExitCode,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

pub(crate) fn invoke(args: &[&str]) -> Outcome {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run(
        std::iter::once("cmdlink").chain(args.iter().copied()),
        &mut stdout,
        &mut stderr,
    );
    Outcome {
        code,
        stdout: String::from_utf8(stdout).expect("utf8 stdout"),
        stderr: String::from_utf8(stderr).expect("utf8 stderr"),
    }
}

#[fixture]
fn daemon() -> TestDaemon {
    TestDaemon::start()
}

#[rstest]
fn ping_prints_pong(daemon: TestDaemon) {
    let outcome = invoke(&[&daemon.socket_flag(), "ping"]);
    assert_eq!(outcome.code, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout, "pong\n");
}

#[rstest]
fn call_sends_initial_payload(daemon: TestDaemon) {
    let outcome = invoke(&[&daemon.socket_flag(), "call", "/echo", "--data", "hi there"]);
    assert_eq!(outcome.code, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout, "hi there\n");
}

#[rstest]
fn pretty_prints_json_replies(daemon: TestDaemon) {
    let outcome = invoke(&[&daemon.socket_flag(), "call", "/status", "--pretty"]);
    assert_eq!(outcome.code, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout, "{\n  \"commands\": 4,\n  \"ready\": true\n}\n");
}

#[rstest]
fn pretty_rejects_text_replies(daemon: TestDaemon) {
    let outcome = invoke(&[&daemon.socket_flag(), "call", "/hello", "--pretty"]);
    assert_eq!(outcome.code, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("is not valid JSON"), "{}", outcome.stderr);
}

#[rstest]
fn shells_lists_one_per_line(daemon: TestDaemon) {
    let outcome = invoke(&[&daemon.socket_flag(), "shells"]);
    assert_eq!(outcome.code, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout, "/bin/sh\n/bin/bash\n");
}

#[test]
fn absent_daemon_suggests_starting_it() {
    let port = {
        let probe = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("probe port");
        probe.local_addr().expect("probe address").port()
    };
    let outcome = invoke(&[&format!("--daemon-socket=tcp://127.0.0.1:{port}"), "ping"]);
    assert_eq!(outcome.code, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("failed to connect"), "{}", outcome.stderr);
    assert!(outcome.stderr.contains("is cmdlinkd running?"), "{}", outcome.stderr);
}

#[cfg(unix)]
#[test]
fn missing_unix_socket_is_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let socket = dir.path().join("absent.sock");
    let flag = format!("--daemon-socket=unix://{}", path_text(&socket));
    let outcome = invoke(&[&flag, "ping"]);
    assert_eq!(outcome.code, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("is cmdlinkd running?"), "{}", outcome.stderr);
}

#[cfg(unix)]
fn path_text(path: &std::path::Path) -> &str {
    path.to_str().expect("utf8 path")
}

#[rstest]
#[case(&["--help"], ExitCode::SUCCESS)]
#[case(&[], ExitCode::from(2))]
#[case(&["call"], ExitCode::from(2))]
fn usage_errors_follow_clap_conventions(#[case] args: &[&str], #[case] expected: ExitCode) {
    let outcome = invoke(args);
    assert_eq!(outcome.code, expected);
    assert!(
        !(outcome.stdout.is_empty() && outcome.stderr.is_empty()),
        "usage text expected"
    );
}
