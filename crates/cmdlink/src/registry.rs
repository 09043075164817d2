//! Command registry mapping names to handlers.
//!
//! The registry is built once at start-up and shared by reference with every
//! connection handler. Reads and writes go through a read-write lock, so the
//! "no registration while dispatching" rule is enforced rather than assumed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::command::CommandName;
use crate::data::ExchangeData;
use crate::error::{CommandError, ErrInfo};
use crate::stream::MessageStream;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Result returned by command handlers.
pub type HandlerResult = Result<ExchangeData, CommandError>;

/// Per-invocation information handed to a handler.
#[derive(Debug, Clone)]
pub struct CommandContext {
    command: CommandName,
    initial: ExchangeData,
    peer: Option<String>,
}

impl CommandContext {
    /// Creates a context for one invocation.
    #[must_use]
    pub const fn new(command: CommandName, initial: ExchangeData, peer: Option<String>) -> Self {
        Self {
            command,
            initial,
            peer,
        }
    }

    /// The command being executed.
    #[must_use]
    pub const fn command(&self) -> &CommandName {
        &self.command
    }

    /// First payload sent by the client after the handshake.
    #[must_use]
    pub const fn initial(&self) -> &ExchangeData {
        &self.initial
    }

    /// Decodes the initial payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns a data-parse error when the payload does not decode as `T`.
    pub fn decode_initial<T: DeserializeOwned>(&self) -> Result<T, ErrInfo> {
        self.initial.decode_json()
    }

    /// Description of the connected peer, when the transport knows one.
    #[must_use]
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }
}

/// Server-side implementation of a command.
///
/// The handler owns the exchange between the acknowledgement and its return:
/// it may send and receive any number of rounds on `stream`. Returning `Ok`
/// sends the payload with the END sentinel; returning `Err` reports the error
/// to the peer. Handlers must not send END themselves unless they also return
/// immediately afterwards.
pub trait CommandHandler: Send + Sync {
    /// Runs the command.
    ///
    /// # Errors
    ///
    /// Returns the failure to report to the peer.
    fn handle(&self, stream: &mut dyn MessageStream, context: &CommandContext) -> HandlerResult;
}

impl<F> CommandHandler for F
where
    F: Fn(&mut dyn MessageStream, &CommandContext) -> HandlerResult + Send + Sync,
{
    fn handle(&self, stream: &mut dyn MessageStream, context: &CommandContext) -> HandlerResult {
        self(stream, context)
    }
}

/// Errors raised while populating the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A handler is already registered under this name.
    #[error("command {name} is already registered")]
    Duplicate {
        /// Name that was already taken.
        name: CommandName,
    },
}

/// Table of command handlers keyed by name.
///
/// Registering a name twice replaces the earlier handler. This keeps test
/// overrides cheap but also hides accidental collisions, so replacements are
/// logged at `warn`; [`CommandRegistry::register_unique`] refuses them.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: RwLock<HashMap<CommandName, Arc<dyn CommandHandler>>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure handler, replacing any earlier handler.
    pub fn register<F>(&self, name: CommandName, handler: F)
    where
        F: Fn(&mut dyn MessageStream, &CommandContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_handler(name, Arc::new(handler));
    }

    /// Registers a shared handler, replacing any earlier handler.
    pub fn register_handler(&self, name: CommandName, handler: Arc<dyn CommandHandler>) {
        let previous = self.write().insert(name.clone(), handler);
        if previous.is_some() {
            warn!(target: REGISTRY_TARGET, command = %name, "command handler replaced");
        } else {
            debug!(target: REGISTRY_TARGET, command = %name, "command registered");
        }
    }

    /// Registers a closure handler, refusing to replace an existing one.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when `name` is already taken.
    pub fn register_unique<F>(&self, name: CommandName, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&mut dyn MessageStream, &CommandContext) -> HandlerResult + Send + Sync + 'static,
    {
        let mut handlers = self.write();
        if handlers.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }
        debug!(target: REGISTRY_TARGET, command = %name, "command registered");
        handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Looks up the handler for `name`.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.read().get(name).cloned()
    }

    /// Returns true when a handler is registered for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Returns the registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<CommandName> {
        let mut names: Vec<_> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true when no command is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Handlers never run under the lock, so a poisoned table is still
    // consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<CommandName, Arc<dyn CommandHandler>>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CommandName, Arc<dyn CommandHandler>>> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}
