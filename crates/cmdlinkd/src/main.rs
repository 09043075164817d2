//! Entry point for the `cmdlinkd` daemon.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match cmdlinkd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if let Some(arguments) = error.arguments() {
                arguments.as_clap().exit();
            }
            let _ = writeln!(io::stderr().lock(), "cmdlinkd: {error}");
            ExitCode::FAILURE
        }
    }
}
