//! The `cmdlinkd` daemon.
//!
//! The daemon loads its configuration, installs structured telemetry,
//! registers the built-in commands and serves them over the configured Unix
//! or TCP socket. Each accepted connection runs on its own thread and carries
//! any number of command cycles, one after another, until the client hangs
//! up. Lifecycle events go to a [`HealthReporter`] so operators can follow
//! bootstrap and shutdown in the logs.

mod bootstrap;
mod builtin;
mod health;
mod process;
mod telemetry;
pub mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use builtin::{HELLO_REPLY, SYSTEM_SHELLS_PATH, ShellList, register_builtins};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon, run_daemon_with,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
