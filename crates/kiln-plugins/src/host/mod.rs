//! Plugin host: one confined invocation per (target, plugin) pair.
//!
//! The [`PluginHost`] turns a declaration and a [`TargetBuildContext`] into a
//! sandboxed process, feeds it the encoded context, and classifies what comes
//! back. Stderr is logged and returned on success and failure alike. Nothing
//! is retried.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kiln_sandbox::{ProcessSpec, SandboxError, SandboxPolicy};
use thiserror::Error;
use tracing::{debug, info};

use crate::declaration::PluginDeclaration;
use crate::process::{PluginExecutor, ProcessFailure};
use crate::protocol::{
    self, Command, DecodeError, DecodedOutput, Diagnostic, InvocationOutput, TargetBuildContext,
    ToolResolution,
};

/// Tracing target for host operations.
const HOST_TARGET: &str = "kiln_plugins::host";

/// Why an invocation failed.
#[derive(Debug, Clone, Error)]
pub enum FailureReason {
    /// The invocation could not be prepared.
    #[error("invocation could not be prepared: {message}")]
    Setup {
        /// Description of the problem.
        message: String,
    },

    /// The sandbox refused to confine the plugin.
    #[error("sandbox error: {message}")]
    Sandbox {
        /// Description of the sandbox failure.
        message: String,
    },

    /// The plugin process could not be started.
    #[error("plugin failed to start: {message}")]
    Spawn {
        /// Description of the launch failure.
        message: String,
    },

    /// Communicating with the plugin failed.
    #[error("I/O error communicating with plugin: {message}")]
    Io {
        /// Description of the I/O failure.
        message: String,
    },

    /// The plugin exceeded its time budget.
    #[error("plugin timed out after {timeout:?}")]
    Timeout {
        /// Budget that was exceeded.
        timeout: Duration,
    },

    /// The plugin exited with a nonzero status.
    #[error("plugin exited with non-zero status {code}")]
    NonZeroExit {
        /// Exit code.
        code: i32,
    },

    /// The plugin was killed by a signal.
    #[error("plugin crashed")]
    Crashed,

    /// The plugin's output does not follow the protocol.
    #[error(transparent)]
    Protocol(DecodeError),

    /// The plugin reported at least one error diagnostic.
    #[error("plugin reported {count} error diagnostic(s): {first}")]
    Diagnostics {
        /// Number of error diagnostics.
        count: usize,
        /// Text of the first one.
        first: String,
    },

    /// A returned command declared a path the host will not trust.
    #[error("command '{command}' declares non-absolute path {}", path.display())]
    UntrustedPath {
        /// Display name of the command.
        command: String,
        /// Offending path.
        path: PathBuf,
    },
}

impl FailureReason {
    /// Coarse category: `protocol`, `process`, `semantic` or `sandbox`.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Protocol(_) | Self::UntrustedPath { .. } => "protocol",
            Self::Setup { .. }
            | Self::Spawn { .. }
            | Self::Io { .. }
            | Self::Timeout { .. }
            | Self::NonZeroExit { .. }
            | Self::Crashed => "process",
            Self::Diagnostics { .. } => "semantic",
            Self::Sandbox { .. } => "sandbox",
        }
    }
}

/// A failed invocation, with everything the plugin said before failing.
#[derive(Debug, Clone, Error)]
#[error("plugin '{plugin}' failed on target '{target}': {reason}")]
pub struct InvocationFailure {
    plugin: String,
    target: String,
    reason: FailureReason,
    diagnostics: Vec<Diagnostic>,
    raw_stderr: String,
}

impl InvocationFailure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(
        plugin: impl Into<String>,
        target: impl Into<String>,
        reason: FailureReason,
        diagnostics: Vec<Diagnostic>,
        raw_stderr: impl Into<String>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            target: target.into(),
            reason,
            diagnostics,
            raw_stderr: raw_stderr.into(),
        }
    }

    /// Plugin name.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Target name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Why the invocation failed.
    #[must_use]
    pub const fn reason(&self) -> &FailureReason {
        &self.reason
    }

    /// Diagnostics the plugin emitted, if its output could be read.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Everything the plugin wrote to stderr.
    #[must_use]
    pub fn raw_stderr(&self) -> &str {
        &self.raw_stderr
    }
}

/// A successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSuccess {
    output: InvocationOutput,
    debug_output: String,
}

impl InvocationSuccess {
    /// Creates a success record.
    #[must_use]
    pub fn new(output: InvocationOutput, debug_output: impl Into<String>) -> Self {
        Self {
            output,
            debug_output: debug_output.into(),
        }
    }

    /// Commands and non-error diagnostics.
    #[must_use]
    pub const fn output(&self) -> &InvocationOutput {
        &self.output
    }

    /// Everything the plugin wrote to stderr.
    #[must_use]
    pub fn debug_output(&self) -> &str {
        &self.debug_output
    }

    /// Splits the record into output and stderr.
    #[must_use]
    pub fn into_parts(self) -> (InvocationOutput, String) {
        (self.output, self.debug_output)
    }
}

/// Launches plugins under the sandbox policy.
#[derive(Debug)]
pub struct PluginHost<E> {
    executor: E,
    policy: SandboxPolicy,
    default_timeout: Duration,
}

impl<E> PluginHost<E> {
    /// Creates a host confining plugins with `policy`.
    #[must_use]
    pub const fn new(executor: E, policy: SandboxPolicy, default_timeout: Duration) -> Self {
        Self {
            executor,
            policy,
            default_timeout,
        }
    }

    /// Creates a host for the running platform.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::UnsupportedPlatform`] when no isolation
    /// primitive exists; no plugin can be launched in that case.
    pub fn for_current_platform(
        executor: E,
        default_timeout: Duration,
    ) -> Result<Self, SandboxError> {
        let policy = SandboxPolicy::for_current_platform()?;
        Ok(Self::new(executor, policy, default_timeout))
    }

    /// The executor launching plugin processes.
    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Time budget for `plugin`: its override or the host default.
    #[must_use]
    pub fn timeout_for(&self, plugin: &PluginDeclaration) -> Duration {
        plugin
            .timeout_secs()
            .map_or(self.default_timeout, Duration::from_secs)
    }
}

impl<E: PluginExecutor> PluginHost<E> {
    /// Invokes `plugin` once for the target described by `context`.
    ///
    /// The plugin may write only beneath its work directory and may read the
    /// package directory, the built-products directory and the resolved
    /// tools. Commands from an output carrying any error diagnostic are
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationFailure`] on sandbox, launch, exit status,
    /// timeout, protocol or diagnostic failure.
    pub fn invoke(
        &self,
        plugin: &PluginDeclaration,
        context: &TargetBuildContext,
        tools: &ToolResolution,
    ) -> Result<InvocationSuccess, InvocationFailure> {
        let fail = |reason: FailureReason, diagnostics: Vec<Diagnostic>, stderr: String| {
            InvocationFailure::new(
                plugin.name(),
                context.target_name(),
                reason,
                diagnostics,
                stderr,
            )
        };

        let input = protocol::encode(context, tools).map_err(|err| {
            fail(
                FailureReason::Setup {
                    message: format!("cannot encode context: {err}"),
                },
                Vec::new(),
                String::new(),
            )
        })?;
        fs::create_dir_all(context.work_directory()).map_err(|err| {
            fail(
                FailureReason::Setup {
                    message: format!(
                        "cannot create work directory {}: {err}",
                        context.work_directory().display()
                    ),
                },
                Vec::new(),
                String::new(),
            )
        })?;

        let spec = ProcessSpec::new(plugin.executable())
            .args(plugin.args().iter().cloned())
            .current_dir(context.work_directory());
        let reads = readable_paths(context, tools);
        let sandboxed = self
            .policy
            .apply_with_reads(spec, &[context.work_directory().to_path_buf()], &reads)
            .map_err(|err| fail(sandbox_reason(&err), Vec::new(), String::new()))?;

        let timeout = self.timeout_for(plugin);
        debug!(
            target: HOST_TARGET,
            plugin = plugin.name(),
            target_name = context.target_name(),
            platform = self.policy.platform(),
            timeout_ms = timeout.as_millis(),
            "invoking plugin"
        );
        let output = self
            .executor
            .run(&sandboxed, &input, timeout)
            .map_err(|err| fail(process_reason(err, timeout), Vec::new(), String::new()))?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stderr.trim().is_empty() {
            info!(
                target: HOST_TARGET,
                plugin = plugin.name(),
                target_name = context.target_name(),
                stderr = %stderr.trim_end(),
                "plugin stderr output"
            );
        }

        match output.exit.code() {
            Some(0) => {}
            Some(code) => {
                return Err(fail(
                    FailureReason::NonZeroExit { code },
                    salvage_diagnostics(&output.stdout),
                    stderr,
                ));
            }
            None => {
                return Err(fail(
                    FailureReason::Crashed,
                    salvage_diagnostics(&output.stdout),
                    stderr,
                ));
            }
        }

        match protocol::decode(&output.stdout) {
            Ok(DecodedOutput::Success(decoded)) => {
                if let Some(reason) = untrusted_path(decoded.commands()) {
                    let (_, diagnostics) = decoded.into_parts();
                    return Err(fail(reason, diagnostics, stderr));
                }
                Ok(InvocationSuccess::new(decoded, stderr))
            }
            Ok(DecodedOutput::Failed(decoded)) => {
                let (_, diagnostics) = decoded.into_parts();
                let errors: Vec<&Diagnostic> =
                    diagnostics.iter().filter(|d| d.is_error()).collect();
                let reason = FailureReason::Diagnostics {
                    count: errors.len(),
                    first: errors
                        .first()
                        .map(|d| d.message().to_owned())
                        .unwrap_or_default(),
                };
                Err(fail(reason, diagnostics, stderr))
            }
            Err(err) => Err(fail(FailureReason::Protocol(err), Vec::new(), stderr)),
        }
    }
}

/// Paths a plugin may read besides its own executable and work directory.
/// Missing locations are left out since they cannot be granted.
fn readable_paths(context: &TargetBuildContext, tools: &ToolResolution) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = vec![
        context.package_directory().to_path_buf(),
        context.target_directory().to_path_buf(),
        context.built_products_directory().to_path_buf(),
    ];
    paths.extend(tools.iter().map(|(_, path)| path.to_path_buf()));
    paths.retain(|path| path.exists());
    paths.dedup();
    paths
}

fn sandbox_reason(err: &SandboxError) -> FailureReason {
    match err {
        SandboxError::Spawn { .. } => FailureReason::Spawn {
            message: err.to_string(),
        },
        _ => FailureReason::Sandbox {
            message: err.to_string(),
        },
    }
}

fn process_reason(err: ProcessFailure, timeout: Duration) -> FailureReason {
    match err {
        ProcessFailure::Sandbox(sandbox) => sandbox_reason(&sandbox),
        ProcessFailure::Timeout { .. } => FailureReason::Timeout { timeout },
        ProcessFailure::Io(source) => FailureReason::Io {
            message: source.to_string(),
        },
    }
}

/// Diagnostics from the stdout of a failed process, when it is readable.
fn salvage_diagnostics(stdout: &[u8]) -> Vec<Diagnostic> {
    match protocol::decode(stdout) {
        Ok(DecodedOutput::Success(output) | DecodedOutput::Failed(output)) => {
            output.into_parts().1
        }
        Err(_) => Vec::new(),
    }
}

fn untrusted_path(commands: &[Command]) -> Option<FailureReason> {
    commands.iter().find_map(|command| {
        command
            .declared_paths()
            .into_iter()
            .find(|path| !Path::is_absolute(path))
            .map(|path| FailureReason::UntrustedPath {
                command: command.display_name().to_owned(),
                path: path.to_path_buf(),
            })
    })
}
