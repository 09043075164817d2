//! Commands every daemon answers.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use cmdlink::{
    CommandContext, CommandHandler, CommandRegistry, ErrCode, ExchangeData, HandlerResult,
    MessageStream, commands,
};
use tracing::debug;

const BUILTIN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::builtin");

/// Reply to the liveness probe.
pub const HELLO_REPLY: &str = "pong";

/// File listing the login shells installed on the host.
pub const SYSTEM_SHELLS_PATH: &str = "/etc/shells";

/// Registers the built-in commands.
pub fn register_builtins(registry: &CommandRegistry) {
    registry.register(
        commands::HELLO,
        |_stream: &mut dyn MessageStream, _context: &CommandContext| {
            Ok(ExchangeData::from_text(HELLO_REPLY))
        },
    );
    registry.register_handler(
        commands::SYSTEM_SHELL_LIST,
        Arc::new(ShellList::new(SYSTEM_SHELLS_PATH)),
    );
}

/// Lists the shells named in a shells file as a JSON array of paths.
#[derive(Debug, Clone)]
pub struct ShellList {
    path: PathBuf,
}

impl ShellList {
    /// Reads shells from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CommandHandler for ShellList {
    fn handle(&self, _stream: &mut dyn MessageStream, _context: &CommandContext) -> HandlerResult {
        let contents = fs::read_to_string(&self.path).map_err(|error| {
            ErrCode::ServerInside.info(format!(
                "failed to read shell list {}: {error}",
                self.path.display()
            ))
        })?;
        let shells = parse_shells(&contents);
        debug!(target: BUILTIN_TARGET, count = shells.len(), "listed shells");
        Ok(ExchangeData::from_json(&shells)?)
    }
}

fn parse_shells(contents: &str) -> Vec<&str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}
