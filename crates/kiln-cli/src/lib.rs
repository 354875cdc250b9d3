//! Command-line front end for the Kiln plugin planner.
//!
//! The binary loads layered configuration, reads a package snapshot, plans
//! every target's plugin chain and prints a summary. With `--execute` it then
//! runs the spliced build graph incrementally. Planner and executor state are
//! persisted in the build directory between runs.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use ortho_config::OrthoConfig;

use kiln_config::{Config, ConfigError};
use kiln_graph::{
    BuildGraph, BuildNode, BuildState, CommandRunner, ExecutionReport, GraphError,
    IncrementalExecutor, RunFailure,
};
use kiln_plugins::process::{PluginExecutor, SandboxExecutor};
use kiln_plugins::{
    BuildPlanner, ContextBuilder, PackageSnapshot, PlanReport, PlanState, PlannerSettings,
    PluginError, PluginHost, SandboxedCommandRunner, SnapshotError, StateError,
};
use kiln_sandbox::{BirdcageIsolation, SandboxError, SandboxPolicy};
use thiserror::Error;
use tracing::{info, warn};

mod telemetry;

pub use telemetry::TelemetryError;

/// Executor launching plugins and commands under the kernel sandbox.
type Executor = SandboxExecutor<BirdcageIsolation>;

/// Tracing target for CLI operations.
const CLI_TARGET: &str = "kiln_cli";

/// Errors that stop a run before or between its phases.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be parsed from its layers.
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    /// The loaded configuration is inconsistent.
    #[error(transparent)]
    InvalidConfiguration(#[from] ConfigError),
    /// Telemetry could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// A path could not be made absolute.
    #[error("cannot resolve {path}: {source}")]
    ResolvePath {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The package snapshot could not be loaded.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// A plugin declaration was rejected.
    #[error(transparent)]
    Plugin(#[from] PluginError),
    /// The host platform has no sandbox.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    /// Planner state could not be read or written.
    #[error(transparent)]
    State(#[from] StateError),
    /// The build graph could not be executed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The summary could not be written.
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}

impl CliError {
    /// Configuration problems exit with 2, everything else with 1.
    const fn exit_code(&self) -> u8 {
        match self {
            Self::LoadConfiguration(_) | Self::InvalidConfiguration(_) | Self::Telemetry(_) => 2,
            _ => 1,
        }
    }
}

/// Paths and inputs shared by the phases of one run.
#[derive(Debug)]
pub(crate) struct Session {
    snapshot: PackageSnapshot,
    work_root: PathBuf,
    products: PathBuf,
    plan_state: PathBuf,
    build_state: PathBuf,
}

impl Session {
    /// Loads the configured snapshot and resolves every build-directory path.
    pub(crate) fn open(config: &Config) -> Result<Self, CliError> {
        let snapshot_path = config.snapshot().ok_or(ConfigError::MissingSnapshot)?;
        let snapshot = PackageSnapshot::load(&absolute(snapshot_path)?)?;
        Ok(Self {
            snapshot,
            work_root: absolute(&config.plugin_work_root())?,
            products: absolute(&config.built_products_dir())?,
            plan_state: absolute(&config.plan_state_path())?,
            build_state: absolute(&config.build_state_path())?,
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf, CliError> {
    std::path::absolute(path).map_err(|source| CliError::ResolvePath {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs the planner with the given arguments and streams.
///
/// Returns exit code 0 on success, 1 when planning or execution failed and 2
/// when configuration could not be loaded.
pub fn run<I, T, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
    W: Write,
    E: Write,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let result = Config::load_from_iter(args)
        .map_err(CliError::LoadConfiguration)
        .and_then(|config| run_with_config(&config, stdout));
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            writeln!(stderr, "kiln-plan: {error}").ok();
            ExitCode::from(error.exit_code())
        }
    }
}

/// Runs one planning pass, and execution when configured, against `config`.
///
/// Returns whether every phase succeeded.
///
/// # Errors
///
/// Returns [`CliError`] when configuration, inputs or state files are
/// unusable.
pub fn run_with_config<W: Write>(config: &Config, stdout: &mut W) -> Result<bool, CliError> {
    config.validate()?;
    telemetry::initialise(config)?;
    let session = Session::open(config)?;

    let host = PluginHost::for_current_platform(Executor::default(), config.plugin_timeout())?;
    let runner = SandboxedCommandRunner::new(
        SandboxPolicy::for_current_platform()?,
        Executor::default(),
    );
    let planner = BuildPlanner::new(
        host,
        ContextBuilder::new(&session.work_root, &session.products),
        runner,
    )
    .with_settings(settings(config));

    let report = plan_and_report(&planner, &session, stdout)?;
    if !report.is_success() {
        return Ok(false);
    }
    if !config.execute {
        return Ok(true);
    }
    let execution = execute_graph(planner.runner(), report.graph(), &session.build_state)?;
    write_execution(&execution, stdout)?;
    Ok(execution.is_success())
}

pub(crate) const fn settings(config: &Config) -> PlannerSettings {
    PlannerSettings {
        max_parallel_invocations: config.max_parallel_invocations,
        always_invoke_plugins: config.always_invoke_plugins,
    }
}

/// Plans the session's package, persists planner state and writes the
/// summary.
pub(crate) fn plan_and_report<E, R, W>(
    planner: &BuildPlanner<E, R>,
    session: &Session,
    stdout: &mut W,
) -> Result<PlanReport, CliError>
where
    E: PluginExecutor,
    R: CommandRunner,
    W: Write,
{
    let registry = session.snapshot.registry()?;
    let mut state = PlanState::load(&session.plan_state)?;
    let report = planner.plan(&session.snapshot, &registry, &session.snapshot, &mut state);
    state.save(&session.plan_state)?;
    info!(
        target: CLI_TARGET,
        chains = report.chains().len(),
        nodes = report.graph().node_count(),
        success = report.is_success(),
        "planning finished"
    );
    write_plan(&report, stdout)?;
    Ok(report)
}

/// Executes stale nodes of `graph`, persisting executor state at `path`.
pub(crate) fn execute_graph<R: CommandRunner>(
    runner: &R,
    graph: &BuildGraph,
    path: &Path,
) -> Result<ExecutionReport, CliError> {
    let mut state = BuildState::load(path)?;
    let report = IncrementalExecutor::new(Borrowed(runner)).execute(graph, &mut state)?;
    state.save(path)?;
    Ok(report)
}

/// Lends a runner to an executor that owns its runner.
struct Borrowed<'a, R>(&'a R);

impl<R: CommandRunner> CommandRunner for Borrowed<'_, R> {
    fn run(&self, node: &BuildNode) -> Result<(), RunFailure> {
        self.0.run(node)
    }
}

/// Writes one line per chain and diagnostic, then every failure.
pub(crate) fn write_plan<W: Write>(report: &PlanReport, out: &mut W) -> Result<(), CliError> {
    let mut write = || -> io::Result<()> {
        for chain in report.chains() {
            let invoked: Vec<String> = chain
                .invocations()
                .iter()
                .map(|record| {
                    if record.cached() {
                        format!("{} (cached)", record.plugin())
                    } else {
                        record.plugin().to_owned()
                    }
                })
                .collect();
            writeln!(out, "target {}: {}", chain.target(), plugin_list(&invoked))?;
            if !chain.skipped().is_empty() {
                writeln!(out, "  skipped: {}", chain.skipped().join(", "))?;
            }
        }
        for (target, plugin, diagnostic) in report.diagnostics() {
            writeln!(out, "{target}/{plugin}: {diagnostic}")?;
        }
        for (target, failure) in report.failures() {
            warn!(target: CLI_TARGET, %target, %failure, "chain failed");
            writeln!(out, "error: target {target}: {failure}")?;
        }
        writeln!(out, "{} build commands planned", report.graph().node_count())
    };
    write().map_err(CliError::Output)
}

fn plugin_list(invoked: &[String]) -> String {
    if invoked.is_empty() {
        "no plugins".to_owned()
    } else {
        invoked.join(", ")
    }
}

fn write_execution<W: Write>(report: &ExecutionReport, out: &mut W) -> Result<(), CliError> {
    let mut write = || -> io::Result<()> {
        for (node, failure) in &report.failed {
            writeln!(out, "error: {node} failed: {failure}")?;
            let stderr = failure.stderr().trim_end();
            if !stderr.is_empty() {
                writeln!(out, "{stderr}")?;
            }
        }
        for node in &report.blocked {
            writeln!(out, "blocked: {node}")?;
        }
        writeln!(
            out,
            "{} commands ran, {} up to date",
            report.ran.len(),
            report.skipped.len()
        )
    };
    write().map_err(CliError::Output)
}

#[cfg(test)]
mod tests;
