//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use cmdlink_config::ConfigOverrides;

/// Runs commands on a `cmdlinkd` daemon.
#[derive(Parser, Debug)]
#[command(name = "cmdlink", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) config: ConfigOverrides,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Checks that the daemon answers.
    Ping,
    /// Lists the login shells installed on the daemon's host.
    Shells,
    /// Runs a command by name and prints its reply.
    Call {
        /// Command name, for example `/hello`.
        #[arg(value_name = "COMMAND")]
        command: String,
        /// Text sent as the command's initial payload.
        #[arg(long, value_name = "TEXT")]
        data: Option<String>,
        /// Pretty-prints a JSON reply.
        #[arg(long)]
        pretty: bool,
    },
}
