//! Process-based execution of confined programs.
//!
//! [`SandboxExecutor`] implements the [`PluginExecutor`] trait by launching a
//! [`SandboxedProcessSpec`] through an [`IsolationPrimitive`], writing the
//! request to stdin, draining stdout and stderr concurrently, and enforcing
//! a wall-clock timeout. This module is the primary integration point with the
//! `kiln-sandbox` crate.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kiln_sandbox::{
    BirdcageIsolation, ExitOutcome, IsolatedChild, IsolationPrimitive, SandboxError,
    SandboxedProcessSpec,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Tracing target for process operations.
const PROCESS_TARGET: &str = "kiln_plugins::process";

/// Interval between exit polls.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything a process wrote, and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Bytes written to stdout.
    pub stdout: Vec<u8>,
    /// Bytes written to stderr.
    pub stderr: Vec<u8>,
    /// Exit status.
    pub exit: ExitOutcome,
}

/// Why a process produced no [`ProcessOutput`].
#[derive(Debug, Error)]
pub enum ProcessFailure {
    /// The sandbox could not be constructed or the process could not start.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// The process exceeded its time budget and was killed with its
    /// descendants. Nothing it wrote is kept.
    #[error("process exceeded its {timeout:?} time budget")]
    Timeout {
        /// Budget that was exceeded.
        timeout: Duration,
    },

    /// Communicating with the process failed.
    #[error("I/O error communicating with process: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl From<io::Error> for ProcessFailure {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

/// Trait abstracting confined process execution for testability.
///
/// The production implementation is [`SandboxExecutor`]. Test code can
/// implement this trait to return pre-configured output without spawning
/// processes.
pub trait PluginExecutor: Send + Sync {
    /// Runs `spec` to completion, feeding it `stdin`.
    ///
    /// A process that exits with a nonzero status still yields
    /// [`ProcessOutput`]; interpreting the status is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessFailure`] when the process cannot be launched, times
    /// out, or its pipes fail.
    fn run(
        &self,
        spec: &SandboxedProcessSpec,
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessFailure>;

    /// Whether several invocations may run concurrently.
    fn supports_parallel_invocations(&self) -> bool {
        false
    }
}

/// Executes confined processes through an [`IsolationPrimitive`].
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor<I = BirdcageIsolation> {
    isolation: I,
}

impl<I: IsolationPrimitive> SandboxExecutor<I> {
    /// Creates an executor launching processes through `isolation`.
    #[must_use]
    pub const fn new(isolation: I) -> Self {
        Self { isolation }
    }

    /// The isolation primitive in use.
    #[must_use]
    pub const fn isolation(&self) -> &I {
        &self.isolation
    }
}

impl<I: IsolationPrimitive> PluginExecutor for SandboxExecutor<I> {
    fn run(
        &self,
        spec: &SandboxedProcessSpec,
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessFailure> {
        debug!(
            target: PROCESS_TARGET,
            program = %spec.spec().program().display(),
            isolation = self.isolation.name(),
            "spawning confined process"
        );
        let mut child = self.isolation.spawn(spec)?;
        supervise(child.as_mut(), stdin, timeout)
    }

    fn supports_parallel_invocations(&self) -> bool {
        self.isolation.supports_concurrent_spawn()
    }
}

/// Feeds stdin, drains both output pipes and waits for exit or timeout.
fn supervise(
    child: &mut dyn IsolatedChild,
    input: &[u8],
    timeout: Duration,
) -> Result<ProcessOutput, ProcessFailure> {
    let stdin = child.take_stdin();
    let stdout = child.take_stdout();
    let stderr = child.take_stderr();
    let start = Instant::now();

    let (exit, stdout, stderr) = thread::scope(|scope| {
        let writer = scope.spawn(move || write_input(stdin, input));
        let out_reader = scope.spawn(move || drain(stdout));
        let err_reader = scope.spawn(move || drain(stderr));

        let exit = wait_for_exit(child, start, timeout);

        // Pipes close once the process tree is gone, so the helpers finish.
        let written = join(writer);
        let stdout = join(out_reader);
        let stderr = join(err_reader);
        if let Err(error) = written {
            debug!(target: PROCESS_TARGET, %error, "process did not read all of its input");
        }
        (exit, stdout, stderr)
    });

    let exit = exit?;
    Ok(ProcessOutput {
        stdout: stdout?,
        stderr: stderr?,
        exit,
    })
}

fn wait_for_exit(
    child: &mut dyn IsolatedChild,
    start: Instant,
    timeout: Duration,
) -> Result<ExitOutcome, ProcessFailure> {
    loop {
        match child.try_wait() {
            Ok(Some(exit)) => {
                debug!(target: PROCESS_TARGET, code = ?exit.code(), "process exited");
                // Descendants left running would hold the output pipes open.
                if let Err(error) = child.kill_tree() {
                    debug!(target: PROCESS_TARGET, %error, "no descendants left to stop");
                }
                return Ok(exit);
            }
            Ok(None) => {}
            Err(error) => {
                // The pipe workers only finish once the process is gone.
                drop(child.kill_tree());
                return Err(error.into());
            }
        }
        if start.elapsed() > timeout {
            warn!(
                target: PROCESS_TARGET,
                timeout_ms = timeout.as_millis(),
                "process timed out, killing process tree"
            );
            child.kill_tree()?;
            return Err(ProcessFailure::Timeout { timeout });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn write_input(stdin: Option<Box<dyn Write + Send>>, input: &[u8]) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(input).and_then(|()| stdin.flush()) {
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
    // Stdin is dropped here, closing the pipe to signal no more input.
}

fn drain(reader: Option<Box<dyn Read + Send>>) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buffer)?;
    }
    Ok(buffer)
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, io::Result<T>>) -> io::Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("pipe worker thread panicked")))
}
