//! Plugin-side runtime for Kiln build-tool plugins.
//!
//! A plugin binary reads exactly one input document from stdin, receives the
//! decoded [`TargetBuildContext`] as an explicit argument, and writes exactly
//! one output document of commands and diagnostics to stdout. There is no
//! global state: everything a plugin may know arrives through
//! [`BuildToolPlugin::create_build_commands`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::convert::Infallible;
//!
//! use kiln_plugin_sdk::{BuildToolPlugin, main_entry};
//! use kiln_plugins::{BuildCommand, Command, Diagnostic, TargetBuildContext, ToolResolution};
//!
//! struct Stamp;
//!
//! impl BuildToolPlugin for Stamp {
//!     type Error = Infallible;
//!
//!     fn create_build_commands(
//!         &self,
//!         context: &TargetBuildContext,
//!         _tools: &ToolResolution,
//!         _diagnostics: &mut Vec<Diagnostic>,
//!     ) -> Result<Vec<Command>, Self::Error> {
//!         let output = context.work_directory().join("stamp.rs");
//!         Ok(vec![Command::BuildCommand(
//!             BuildCommand::new("Stamp", "/usr/bin/touch")
//!                 .args([output.display().to_string()])
//!                 .output(output),
//!         )])
//!     }
//! }
//!
//! fn main() {
//!     std::process::exit(main_entry(&Stamp));
//! }
//! ```

#[cfg(test)]
mod tests;

use std::io::{self, Read, Write};

use kiln_plugins::protocol::{self, PROTOCOL_VERSION};
use kiln_plugins::{Command, Diagnostic, InvocationOutput, TargetBuildContext, ToolResolution};
use thiserror::Error;

/// The calling convention every build-tool plugin implements.
pub trait BuildToolPlugin {
    /// Error the plugin may fail with; reported as an error diagnostic.
    type Error: std::fmt::Display;

    /// Returns the commands to splice for the target described by `context`.
    ///
    /// Warnings and remarks pushed onto `diagnostics` are reported alongside
    /// the commands. Pushing an error diagnostic makes the host discard the
    /// commands.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when no commands can be produced.
    fn create_build_commands(
        &self,
        context: &TargetBuildContext,
        tools: &ToolResolution,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Vec<Command>, Self::Error>;
}

/// Errors raised while exchanging documents with the host.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Reading the input document failed.
    #[error("failed to read input document: {source}")]
    Read {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Serialising the output document failed.
    #[error("failed to serialise output document: {source}")]
    Serialise {
        /// Underlying serialisation error.
        #[source]
        source: serde_json::Error,
    },
    /// Writing the output document failed.
    #[error("failed to write output document: {source}")]
    Write {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Handles one invocation: reads the input from `stdin`, calls `plugin`, and
/// writes the output to `stdout`.
///
/// An unreadable input document or a plugin error is reported to the host
/// as an error diagnostic, not as an `Err`.
///
/// # Errors
///
/// Returns [`SdkError`] when stdin cannot be read or the output cannot be
/// written.
pub fn run<P: BuildToolPlugin + ?Sized>(
    plugin: &P,
    stdin: &mut impl Read,
    stdout: &mut impl Write,
) -> Result<(), SdkError> {
    let mut input = Vec::new();
    stdin
        .read_to_end(&mut input)
        .map_err(|source| SdkError::Read { source })?;

    let output = respond(plugin, &input);
    let document =
        protocol::encode_output(&output).map_err(|source| SdkError::Serialise { source })?;
    stdout
        .write_all(&document)
        .map_err(|source| SdkError::Write { source })?;
    stdout.flush().map_err(|source| SdkError::Write { source })
}

/// Runs `plugin` against the process's stdio and returns the exit code.
///
/// Failures to exchange documents are written to stderr and yield exit code
/// 1; everything else, including plugin errors, yields 0.
#[must_use]
pub fn main_entry<P: BuildToolPlugin + ?Sized>(plugin: &P) -> i32 {
    let stdin = io::stdin();
    let stdout = io::stdout();
    match run(plugin, &mut stdin.lock(), &mut stdout.lock()) {
        Ok(()) => 0,
        Err(error) => {
            writeln!(io::stderr().lock(), "{error}").ok();
            1
        }
    }
}

fn respond<P: BuildToolPlugin + ?Sized>(plugin: &P, input: &[u8]) -> InvocationOutput {
    let request = match protocol::decode_input(input) {
        Ok(request) => request,
        Err(error) => return failure(format!("invalid input document: {error}")),
    };
    if request.protocol_version != PROTOCOL_VERSION {
        return failure(format!(
            "unsupported protocol version {} (expected {PROTOCOL_VERSION})",
            request.protocol_version
        ));
    }

    let mut diagnostics = Vec::new();
    match plugin.create_build_commands(&request.context, &request.tools, &mut diagnostics) {
        Ok(commands) => InvocationOutput::new(commands, diagnostics),
        Err(error) => {
            diagnostics.push(Diagnostic::error(error.to_string()));
            InvocationOutput::new(Vec::new(), diagnostics)
        }
    }
}

fn failure(message: String) -> InvocationOutput {
    InvocationOutput::new(Vec::new(), vec![Diagnostic::error(message)])
}
