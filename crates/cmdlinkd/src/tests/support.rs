//! Collaborators and world state for the daemon behavioural suite.

use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};

use cmdlink::{ErrInfo, Exchange, ExchangeData, JsonLineStream};
use cmdlink_config::{Config, ConfigError, SocketEndpoint};

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, bootstrap_with};
use crate::health::HealthReporter;
use crate::transport::{DispatchConnectionHandler, ListenerHandle, SocketListener};

/// Lifecycle event captured by [`RecordingHealthReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded { commands: usize },
    BootstrapFailed(String),
    ListenerReady(SocketEndpoint),
    ShutdownRequested,
}

/// Reporter that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events.lock().expect("events lock").clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config, commands: usize) {
        self.record(HealthEvent::BootstrapSucceeded { commands });
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        self.record(HealthEvent::ListenerReady(endpoint.clone()));
    }

    fn shutdown_requested(&self) {
        self.record(HealthEvent::ShutdownRequested);
    }
}

/// Loader that fails the way an invalid `CMDLINK_LOG_FORMAT` would.
struct InvalidFormatLoader;

impl ConfigLoader for InvalidFormatLoader {
    fn load(&self) -> Result<Config, ConfigError> {
        Config::load_from_iter(["cmdlinkd", "--log-format", "pretty"])
    }
}

/// Scenario world shared across BDD steps.
pub struct DaemonWorld {
    loader: Box<dyn ConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    daemon: Option<Daemon>,
    bootstrap_error: Option<BootstrapError>,
    listener: Option<ListenerHandle>,
    address: Option<SocketAddr>,
    client: Option<JsonLineStream<TcpStream>>,
    pub replies: Vec<Result<ExchangeData, ErrInfo>>,
}

impl DaemonWorld {
    pub fn new() -> Self {
        Self {
            loader: Box::new(StaticConfigLoader::new(loopback_config())),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemon: None,
            bootstrap_error: None,
            listener: None,
            address: None,
            client: None,
            replies: Vec::new(),
        }
    }

    pub fn use_loopback_config(&mut self) {
        self.loader = Box::new(StaticConfigLoader::new(loopback_config()));
    }

    pub fn use_invalid_log_format(&mut self) {
        self.loader = Box::new(InvalidFormatLoader);
    }

    pub fn use_socket(&mut self, endpoint: SocketEndpoint) {
        self.loader = Box::new(StaticConfigLoader::new(Config {
            daemon_socket: endpoint,
            ..loopback_config()
        }));
    }

    pub fn bootstrap(&mut self) {
        let reporter: Arc<dyn HealthReporter> = self.reporter.clone();
        match bootstrap_with(&*self.loader, reporter) {
            Ok(daemon) => self.daemon = Some(daemon),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    pub const fn daemon(&self) -> Option<&Daemon> {
        self.daemon.as_ref()
    }

    pub const fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    pub fn start_listening(&mut self) {
        let daemon = self.daemon.as_ref().expect("daemon bootstrapped");
        let listener =
            SocketListener::bind(daemon.config().daemon_socket()).expect("bind listener");
        self.address = listener.local_addr();
        let handler = Arc::new(DispatchConnectionHandler::new(daemon.dispatcher()));
        self.listener = Some(listener.start(handler).expect("start listener"));
        daemon.reporter().listener_ready(daemon.config().daemon_socket());
    }

    pub fn connect(&mut self) {
        let address = self.address.expect("listener address");
        let stream = TcpStream::connect(address).expect("connect to daemon");
        self.client = Some(JsonLineStream::new(stream));
    }

    pub fn call(&mut self, command: &str) {
        let client = self.client.as_mut().expect("connected client");
        self.replies
            .push(Exchange::new(command.to_owned()).run(client));
    }

    pub fn reply(&self, call: usize) -> &Result<ExchangeData, ErrInfo> {
        self.replies
            .get(call - 1)
            .unwrap_or_else(|| panic!("call {call} was not made"))
    }
}

impl Drop for DaemonWorld {
    fn drop(&mut self) {
        self.client = None;
        if let Some(listener) = self.listener.take() {
            listener.shutdown();
            listener.join().expect("join listener");
        }
    }
}

fn loopback_config() -> Config {
    Config {
        daemon_socket: SocketEndpoint::tcp("127.0.0.1", 0),
        log_filter: "warn".to_owned(),
        ..Config::default()
    }
}
