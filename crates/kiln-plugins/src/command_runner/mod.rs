//! Sandboxed execution of spliced commands.
//!
//! Commands run under the same policy as plugins, with no network. A build
//! command may write only the directories holding its declared outputs; a
//! prebuild command may write only its output directory. Declared inputs are
//! readable.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use kiln_graph::{BuildNode, CommandRunner, RunFailure};
use kiln_sandbox::{BirdcageIsolation, IsolationPrimitive, ProcessSpec, SandboxPolicy};
use tracing::debug;

use crate::process::{PluginExecutor, SandboxExecutor};

/// Tracing target for command execution.
const COMMAND_TARGET: &str = "kiln_plugins::command_runner";

/// Time budget for one spliced command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Runs build and prebuild nodes inside the sandbox.
#[derive(Debug, Clone)]
pub struct SandboxedCommandRunner<I = BirdcageIsolation> {
    policy: SandboxPolicy,
    executor: SandboxExecutor<I>,
    timeout: Duration,
}

impl<I: IsolationPrimitive> SandboxedCommandRunner<I> {
    /// Creates a runner confining commands with `policy`.
    #[must_use]
    pub const fn new(policy: SandboxPolicy, executor: SandboxExecutor<I>) -> Self {
        Self {
            policy,
            executor,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Overrides the per-command time budget.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-command time budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<I: IsolationPrimitive> CommandRunner for SandboxedCommandRunner<I> {
    fn run(&self, node: &BuildNode) -> Result<(), RunFailure> {
        let writes = write_roots(node)?;
        let command = node.command();
        let mut spec = ProcessSpec::new(command.executable())
            .args(command.arguments().iter().cloned())
            .envs(command.environment().clone());
        if let Some(dir) = command.working_directory() {
            spec = spec.current_dir(dir);
        }
        let reads: Vec<PathBuf> = node
            .inputs()
            .iter()
            .filter(|path| path.exists())
            .cloned()
            .collect();
        let sandboxed = self
            .policy
            .apply_with_reads(spec, &writes, &reads)
            .map_err(|err| launch_failure(&err))?;

        debug!(target: COMMAND_TARGET, node = %node.id(), "running command");
        let output = self
            .executor
            .run(&sandboxed, &[], self.timeout)
            .map_err(|err| launch_failure(&err))?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stderr.trim().is_empty() {
            debug!(
                target: COMMAND_TARGET,
                node = %node.id(),
                stderr = %stderr.trim_end(),
                "command stderr output"
            );
        }
        match output.exit.code() {
            Some(0) => Ok(()),
            Some(code) => Err(RunFailure::ExitStatus { code, stderr }),
            None => Err(RunFailure::Terminated { stderr }),
        }
    }
}

/// Directories the command may write, created up front so they can be
/// granted.
fn write_roots(node: &BuildNode) -> Result<Vec<PathBuf>, RunFailure> {
    let mut roots: Vec<PathBuf> = node.output_directory().map_or_else(
        || {
            node.outputs()
                .iter()
                .filter_map(|output| output.parent().map(PathBuf::from))
                .collect()
        },
        |dir| vec![dir.to_path_buf()],
    );
    roots.sort();
    roots.dedup();
    for root in &roots {
        fs::create_dir_all(root).map_err(|err| RunFailure::Launch {
            message: format!("cannot create {}: {err}", root.display()),
        })?;
    }
    Ok(roots)
}

fn launch_failure(err: &dyn std::error::Error) -> RunFailure {
    RunFailure::Launch {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests;
