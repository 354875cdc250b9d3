//! Shared test doubles and behavioural tests for the plugin crate.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use kiln_graph::{BuildNode, CommandRunner, RunFailure};
use kiln_sandbox::{
    ExitOutcome, IsolatedChild, IsolationPrimitive, SandboxError, SandboxPolicy,
    SandboxedProcessSpec,
};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

use crate::host::PluginHost;
use crate::process::{PluginExecutor, ProcessFailure, ProcessOutput};
use crate::protocol::{
    InvocationInput, InvocationOutput, TargetBuildContext, decode_input, encode_output,
};


/// Isolation that launches the program directly in its own process group.
///
/// Used to exercise real pipes, exit codes and timeouts without kernel
/// sandboxing.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ShellIsolation;

impl IsolationPrimitive for ShellIsolation {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn supports_concurrent_spawn(&self) -> bool {
        true
    }

    fn spawn(&self, spec: &SandboxedProcessSpec) -> Result<Box<dyn IsolatedChild>, SandboxError> {
        let process = spec.spec();
        let mut command = Command::new(process.program());
        command
            .args(process.arguments())
            .env_clear()
            .env("PATH", "/usr/bin:/bin")
            .envs(process.environment())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(dir) = process.working_directory() {
            command.current_dir(dir);
        }
        let child = command.spawn().map_err(|source| SandboxError::Spawn {
            program: process.program().to_path_buf(),
            source,
        })?;
        Ok(Box::new(ShellChild { child }))
    }
}

struct ShellChild {
    child: Child,
}

impl IsolatedChild for ShellChild {
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.child
            .stdin
            .take()
            .map(|pipe| Box::new(pipe) as Box<dyn Write + Send>)
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|pipe| Box::new(pipe) as Box<dyn Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|pipe| Box::new(pipe) as Box<dyn Read + Send>)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>> {
        Ok(self.child.try_wait()?.map(|status| {
            status
                .code()
                .map_or_else(ExitOutcome::terminated, ExitOutcome::exited)
        }))
    }

    fn kill_tree(&mut self) -> io::Result<()> {
        let group = i32::try_from(self.child.id()).map_err(io::Error::other)?;
        // The group may already be gone when the leader exited on its own.
        drop(killpg(Pid::from_raw(group), Signal::SIGKILL));
        self.child.wait().map(drop)
    }
}

/// Writes an executable `#!/bin/sh` script into `dir`.
pub(crate) fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut permissions = fs::metadata(&path).expect("script metadata").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).expect("make script executable");
    path
}

/// Policy used by tests; the Linux policy has no platform side effects.
pub(crate) fn test_policy() -> SandboxPolicy {
    SandboxPolicy::for_platform("linux").expect("linux is supported")
}

type Responder = Box<dyn Fn(&InvocationInput) -> InvocationOutput + Send + Sync>;

/// Executor that answers invocations in-process, keyed by plugin program.
///
/// Programs without a responder answer with an empty output.
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    responders: BTreeMap<PathBuf, Responder>,
    calls: Mutex<Vec<(PathBuf, TargetBuildContext)>>,
}

impl ScriptedExecutor {
    pub(crate) fn respond(
        mut self,
        program: impl Into<PathBuf>,
        responder: impl Fn(&InvocationInput) -> InvocationOutput + Send + Sync + 'static,
    ) -> Self {
        self.responders.insert(program.into(), Box::new(responder));
        self
    }

    /// Every invocation so far with the context it received.
    pub(crate) fn calls(&self) -> Vec<(PathBuf, TargetBuildContext)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn call_count(&self, program: &Path) -> usize {
        self.calls()
            .iter()
            .filter(|(called, _)| called == program)
            .count()
    }
}

impl PluginExecutor for ScriptedExecutor {
    fn run(
        &self,
        spec: &SandboxedProcessSpec,
        stdin: &[u8],
        _timeout: Duration,
    ) -> Result<ProcessOutput, ProcessFailure> {
        let input = decode_input(stdin).expect("host writes a valid input document");
        let program = spec.spec().program().to_path_buf();
        self.calls
            .lock()
            .expect("calls lock")
            .push((program.clone(), input.context.clone()));
        let output = self
            .responders
            .get(&program)
            .map_or_else(InvocationOutput::default, |respond| respond(&input));
        Ok(ProcessOutput {
            stdout: encode_output(&output).expect("encode output"),
            stderr: Vec::new(),
            exit: ExitOutcome::exited(0),
        })
    }

    fn supports_parallel_invocations(&self) -> bool {
        true
    }
}

/// Host around a [`ScriptedExecutor`].
pub(crate) fn scripted_host(executor: ScriptedExecutor) -> PluginHost<ScriptedExecutor> {
    PluginHost::new(executor, test_policy(), Duration::from_secs(5))
}

/// Command runner backed by a closure.
pub(crate) struct FnRunner<F>(pub(crate) F);

impl<F> CommandRunner for FnRunner<F>
where
    F: Fn(&BuildNode) -> Result<(), RunFailure> + Send + Sync,
{
    fn run(&self, node: &BuildNode) -> Result<(), RunFailure> {
        (self.0)(node)
    }
}

/// Runner for graphs without prebuild commands.
pub(crate) fn idle_runner() -> FnRunner<fn(&BuildNode) -> Result<(), RunFailure>> {
    fn refuse(node: &BuildNode) -> Result<(), RunFailure> {
        Err(RunFailure::Launch {
            message: format!("unexpected run of {}", node.id()),
        })
    }
    FnRunner(refuse)
}
