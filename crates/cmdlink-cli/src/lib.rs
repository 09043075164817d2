//! Command-line client for the `cmdlinkd` daemon.
//!
//! Each invocation opens one connection to the configured daemon socket,
//! runs a single command exchange over it and prints the reply. Replies go
//! to stdout; command failures and connection problems go to stderr with a
//! non-zero exit status.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use cmdlink::{CommandName, Exchange, ExchangeData, JsonLineStream, commands};
use cmdlink_config::SocketEndpoint;

mod cli;
mod errors;
mod transport;

use cli::{Cli, CliCommand};
use errors::AppError;

/// Parses `args` (program name first), runs the requested command and
/// reports the outcome on `stdout` and `stderr`.
pub fn run<I, T, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return report_usage(&error, stdout, stderr),
    };
    let config = cli.config.resolve();

    match execute(&cli.command, config.daemon_socket(), stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "cmdlink: {error}");
            if error.is_daemon_not_running() {
                let _ = writeln!(stderr, "cmdlink: is cmdlinkd running?");
            }
            ExitCode::FAILURE
        }
    }
}

fn report_usage<W: Write, E: Write>(
    error: &clap::Error,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode {
    let rendered = error.render().to_string();
    if error.use_stderr() {
        let _ = write!(stderr, "{rendered}");
        ExitCode::from(2)
    } else {
        let _ = write!(stdout, "{rendered}");
        ExitCode::SUCCESS
    }
}

fn execute<W: Write>(
    command: &CliCommand,
    endpoint: &SocketEndpoint,
    stdout: &mut W,
) -> Result<(), AppError> {
    match command {
        CliCommand::Ping => {
            let reply = call(endpoint, commands::HELLO, ExchangeData::empty())?;
            write_reply(stdout, &reply)
        }
        CliCommand::Shells => {
            let command = commands::SYSTEM_SHELL_LIST;
            let reply = call(endpoint, command.clone(), ExchangeData::empty())?;
            let shells: Vec<String> =
                reply
                    .decode_json()
                    .map_err(|error| AppError::Command {
                        command: command.to_string(),
                        error,
                    })?;
            for shell in shells {
                writeln!(stdout, "{shell}")?;
            }
            Ok(())
        }
        CliCommand::Call {
            command,
            data,
            pretty,
        } => {
            let initial = data
                .as_deref()
                .map_or_else(ExchangeData::empty, ExchangeData::from_text);
            let reply = call(endpoint, CommandName::new(command.as_str()), initial)?;
            if *pretty {
                write_pretty(stdout, command, &reply)
            } else {
                write_reply(stdout, &reply)
            }
        }
    }
}

fn call(
    endpoint: &SocketEndpoint,
    command: CommandName,
    initial: ExchangeData,
) -> Result<ExchangeData, AppError> {
    let mut stream = JsonLineStream::new(transport::connect(endpoint)?);
    let name = command.to_string();
    Exchange::new(command)
        .data(initial)
        .run(&mut stream)
        .map_err(|error| AppError::Command {
            command: name,
            error,
        })
}

fn write_reply<W: Write>(stdout: &mut W, reply: &ExchangeData) -> Result<(), AppError> {
    stdout.write_all(reply.as_bytes())?;
    if !reply.as_bytes().ends_with(b"\n") && !reply.is_empty() {
        writeln!(stdout)?;
    }
    Ok(())
}

fn write_pretty<W: Write>(
    stdout: &mut W,
    command: &str,
    reply: &ExchangeData,
) -> Result<(), AppError> {
    let value: serde_json::Value =
        serde_json::from_slice(reply.as_bytes()).map_err(|source| AppError::ParseReply {
            command: command.to_owned(),
            source,
        })?;
    let rendered =
        serde_json::to_string_pretty(&value).map_err(|source| AppError::ParseReply {
            command: command.to_owned(),
            source,
        })?;
    writeln!(stdout, "{rendered}")?;
    Ok(())
}

#[cfg(test)]
mod tests;
