//! CLI entrypoint for the Kiln plugin planner.
//!
//! The binary delegates to [`kiln_cli::run`], which loads configuration,
//! plans every target of the configured package snapshot, and optionally
//! executes the resulting build graph.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    kiln_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
