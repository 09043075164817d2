//! Socket transport for the daemon.
//!
//! The listener binds the configured endpoint and accepts connections on a
//! background thread, handing each one to a [`ConnectionHandler`] on a thread
//! of its own. [`DispatchConnectionHandler`] is the production handler: it
//! frames the connection as JSON lines and serves commands until the peer
//! hangs up.

mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod listener_tests;

pub use self::errors::ListenerError;
pub use self::handler::{ConnectionHandler, ConnectionStream, DispatchConnectionHandler};
pub use self::listener::{ListenerHandle, SocketListener};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
