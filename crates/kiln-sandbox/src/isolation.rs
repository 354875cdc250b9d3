//! Isolation primitives that launch confined processes.
//!
//! The policy engine only describes restrictions; an [`IsolationPrimitive`]
//! enforces them. [`BirdcageIsolation`] is the production implementation.
//! Callers that need a different mechanism inject their own primitive.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use birdcage::process::{Child, Command, Stdio};
use birdcage::{Birdcage, Exception, Sandbox as BirdcageTrait};
use tracing::debug;

use crate::env_guard::LaunchScope;
use crate::error::SandboxError;
use crate::policy::SandboxedProcessSpec;
use crate::profile::{EnvironmentPolicy, SandboxProfile};
use crate::runtime::thread_count;

const SANDBOX_TARGET: &str = "kiln_sandbox::isolation";

/// How a confined process finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    code: Option<i32>,
}

impl ExitOutcome {
    /// Outcome of a process that exited with `code`.
    #[must_use]
    pub const fn exited(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// Outcome of a process terminated without an exit code (by a signal).
    #[must_use]
    pub const fn terminated() -> Self {
        Self { code: None }
    }

    /// Exit code, absent when the process was killed by a signal.
    #[must_use]
    pub const fn code(self) -> Option<i32> {
        self.code
    }

    /// Returns `true` for a zero exit code.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Handle to a running confined process.
pub trait IsolatedChild: Send {
    /// Takes the write end of the child's stdin pipe.
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>>;
    /// Takes the read end of the child's stdout pipe.
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;
    /// Takes the read end of the child's stderr pipe.
    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>>;
    /// Polls for exit without blocking.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the status cannot be queried.
    fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>>;
    /// Forcibly terminates the process and everything it spawned, then reaps
    /// it.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the signal cannot be delivered.
    fn kill_tree(&mut self) -> io::Result<()>;
}

/// Platform mechanism that launches a [`SandboxedProcessSpec`].
///
/// The child's stdin, stdout and stderr are always piped.
pub trait IsolationPrimitive: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether processes may be spawned while other threads are running.
    fn supports_concurrent_spawn(&self) -> bool;

    /// Launches the process under the spec's restrictions.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError`] when the restrictions cannot be applied or
    /// the process cannot be started.
    fn spawn(&self, spec: &SandboxedProcessSpec) -> Result<Box<dyn IsolatedChild>, SandboxError>;
}

/// Isolation backed by `birdcage`.
///
/// `birdcage` asserts that activation happens on a single-threaded process,
/// so spawning checks the thread count first and reports
/// [`SandboxError::MultiThreaded`] instead of panicking.
#[derive(Debug, Default, Clone, Copy)]
pub struct BirdcageIsolation;

impl IsolationPrimitive for BirdcageIsolation {
    fn name(&self) -> &'static str {
        "birdcage"
    }

    fn supports_concurrent_spawn(&self) -> bool {
        false
    }

    fn spawn(&self, spec: &SandboxedProcessSpec) -> Result<Box<dyn IsolatedChild>, SandboxError> {
        let process = spec.spec();
        let program = canonicalise(process.program())?;
        let exceptions = launch_exceptions(spec, &program)?;
        ensure_single_threaded()?;

        let mut command = Command::new(process.program());
        command.args(process.arguments());
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        debug!(
            target: SANDBOX_TARGET,
            program = %program.display(),
            exceptions = exceptions.len(),
            "activating birdcage"
        );

        let scope = LaunchScope::enter(process.environment(), process.working_directory())?;
        let mut sandbox = Birdcage::new();
        for exception in exceptions {
            sandbox.add_exception(exception)?;
        }
        let child = sandbox.spawn(command)?;
        drop(scope);

        Ok(Box::new(BirdcageChild { child }))
    }
}

struct BirdcageChild {
    child: Child,
}

impl IsolatedChild for BirdcageChild {
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.child
            .stdin
            .take()
            .map(|stdin| Box::new(stdin) as Box<dyn Write + Send>)
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as Box<dyn Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as Box<dyn Read + Send>)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>> {
        let status = self.child.try_wait()?;
        Ok(status.map(|status| match status.code() {
            Some(code) => ExitOutcome::exited(code),
            None => ExitOutcome::terminated(),
        }))
    }

    fn kill_tree(&mut self) -> io::Result<()> {
        // The child is init of its own PID namespace; its death takes every
        // descendant with it.
        self.child.kill()?;
        self.child.wait().map(drop)
    }
}

fn ensure_single_threaded() -> Result<(), SandboxError> {
    let threads =
        thread_count().map_err(|source| SandboxError::ThreadCountUnavailable { source })?;
    if threads > 1 {
        return Err(SandboxError::MultiThreaded {
            thread_count: threads,
        });
    }
    Ok(())
}

/// Translates a profile into `birdcage` exceptions.
///
/// Networking never appears in the result.
pub(crate) fn collect_exceptions(
    profile: &SandboxProfile,
    program: &Path,
) -> Result<Vec<Exception>, SandboxError> {
    let mut exceptions = Vec::new();
    for path in canonicalised_set(profile.read_only_paths())? {
        exceptions.push(Exception::Read(path));
    }
    for path in canonicalised_set(profile.read_write_paths())? {
        exceptions.push(Exception::WriteAndRead(path));
    }
    let executables = canonicalised_set(profile.executable_paths())?;
    if !executables.contains(program) {
        return Err(SandboxError::ExecutableNotAuthorised {
            program: program.to_path_buf(),
        });
    }
    for path in executables {
        exceptions.push(Exception::ExecuteAndRead(path));
    }

    match profile.environment_policy() {
        EnvironmentPolicy::Isolated => {}
        EnvironmentPolicy::AllowList(keys) => {
            for key in keys {
                exceptions.push(Exception::Environment(key.clone()));
            }
        }
    }

    Ok(exceptions)
}

/// Profile exceptions plus the variables the spec sets for the child.
///
/// The variables reach the child through the calling process, so each one
/// must survive activation.
pub(crate) fn launch_exceptions(
    spec: &SandboxedProcessSpec,
    program: &Path,
) -> Result<Vec<Exception>, SandboxError> {
    let mut exceptions = collect_exceptions(spec.profile(), program)?;
    for key in spec.spec().environment().keys() {
        let granted = exceptions
            .iter()
            .any(|exception| matches!(exception, Exception::Environment(name) if name == key));
        if !granted {
            exceptions.push(Exception::Environment(key.clone()));
        }
    }
    Ok(exceptions)
}

fn canonicalised_set(paths: &[PathBuf]) -> Result<BTreeSet<PathBuf>, SandboxError> {
    let mut set = BTreeSet::new();
    for path in paths {
        set.insert(canonicalise(path)?);
    }
    Ok(set)
}

fn canonicalise(path: &Path) -> Result<PathBuf, SandboxError> {
    if !path.exists() {
        return Err(SandboxError::MissingPath {
            path: path.to_path_buf(),
        });
    }

    fs::canonicalize(path).map_err(|source| SandboxError::CanonicalisationFailed {
        path: path.to_path_buf(),
        source,
    })
}
