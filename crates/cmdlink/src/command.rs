//! Command names and the catalogue of names used across the product.

use std::borrow::{Borrow, Cow};
use std::fmt;

use crate::data::ExchangeData;
use crate::error::ErrInfo;
use crate::exchange::Exchange;
use crate::stream::MessageStream;

/// Path-like token naming a command, for example `/system/shell/list`.
///
/// Names compare by exact string match and never change once declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandName(Cow<'static, str>);

impl CommandName {
    /// Declares a command name from a static string.
    #[must_use]
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Creates a command name from an owned string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Runs this command without initial data and without interceptors.
    ///
    /// # Errors
    ///
    /// Returns the peer's error, or an [`ErrInfo`] describing a transport
    /// failure.
    pub fn exchange<S>(&self, stream: &mut S) -> Result<ExchangeData, ErrInfo>
    where
        S: MessageStream + ?Sized,
    {
        Exchange::new(self.clone()).run(stream)
    }

    /// Runs this command with `data` as the first payload the handler sees.
    ///
    /// # Errors
    ///
    /// Returns the peer's error, or an [`ErrInfo`] describing a transport
    /// failure.
    pub fn exchange_with_data<S>(
        &self,
        data: ExchangeData,
        stream: &mut S,
    ) -> Result<ExchangeData, ErrInfo>
    where
        S: MessageStream + ?Sized,
    {
        Exchange::new(self.clone()).data(data).run(stream)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl AsRef<str> for CommandName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CommandName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for CommandName {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for CommandName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Command names exchanged between the fleet manager and its servers.
pub mod commands {
    use super::CommandName;

    /// Liveness probe answered with `"pong"`.
    pub const HELLO: CommandName = CommandName::from_static("/hello");
    /// Runs a system command on the server.
    pub const SYSTEM_CALL: CommandName = CommandName::from_static("/system/call");
    /// Lists the shells available on the server.
    pub const SYSTEM_SHELL_LIST: CommandName = CommandName::from_static("/system/shell/list");
    /// Reports the shell currently in use.
    pub const SYSTEM_SHELL_CURRENT: CommandName =
        CommandName::from_static("/system/shell/current");
    /// Selects the shell to use.
    pub const SYSTEM_SHELL_CURRENT_SETTING: CommandName =
        CommandName::from_static("/system/shell/current/setting");
    /// Installs a plugin.
    pub const PLUGIN_INSTALL: CommandName = CommandName::from_static("/plugin/install");
    /// Registers a remote server with the local manager.
    pub const INSIDE_REMOTE_SERVER_ADD: CommandName =
        CommandName::from_static("/inside/remote/server/add");
}
