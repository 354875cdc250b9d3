//! Incremental execution of build nodes.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::GraphError;
use crate::graph::BuildGraph;
use crate::node::{BuildNode, NodeId};
use crate::state::{BuildState, NodeRecord};

const EXECUTOR_TARGET: &str = "kiln_graph::executor";

/// Why a command did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunFailure {
    /// The command could not be launched.
    #[error("command could not be started: {message}")]
    Launch {
        /// Description of the launch failure.
        message: String,
    },
    /// The command exited with a nonzero status.
    #[error("command exited with status {code}")]
    ExitStatus {
        /// Exit code.
        code: i32,
        /// Captured standard error.
        stderr: String,
    },
    /// The command was killed by a signal.
    #[error("command was terminated by a signal")]
    Terminated {
        /// Captured standard error.
        stderr: String,
    },
}

impl RunFailure {
    /// Standard error captured before the failure, if any.
    #[must_use]
    pub fn stderr(&self) -> &str {
        match self {
            Self::Launch { .. } => "",
            Self::ExitStatus { stderr, .. } | Self::Terminated { stderr } => stderr,
        }
    }
}

/// Runs the command of one node to completion.
///
/// Used both by [`IncrementalExecutor`] for build nodes and by the planner for
/// prebuild nodes.
pub trait CommandRunner: Send + Sync {
    /// Runs `node`'s command, blocking until it exits.
    ///
    /// # Errors
    ///
    /// Returns [`RunFailure`] when the command cannot be launched or does not
    /// exit successfully.
    fn run(&self, node: &BuildNode) -> Result<(), RunFailure>;
}

/// Outcome of one execution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Nodes whose command ran successfully.
    pub ran: Vec<NodeId>,
    /// Nodes skipped as fresh.
    pub skipped: Vec<NodeId>,
    /// Nodes whose command failed.
    pub failed: Vec<(NodeId, RunFailure)>,
    /// Nodes not attempted because a dependency failed.
    pub blocked: Vec<NodeId>,
}

impl ExecutionReport {
    /// Returns `true` when no node failed or was blocked.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }
}

/// Runs build nodes in dependency order, skipping fresh ones.
///
/// A node is stale when it has no record of a successful run, when its command
/// line changed, when any declared input's content digest differs from the
/// recorded one, or when any declared output is missing.
#[derive(Debug)]
pub struct IncrementalExecutor<R> {
    runner: R,
}

impl<R: CommandRunner> IncrementalExecutor<R> {
    /// Creates an executor that launches commands through `runner`.
    #[must_use]
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }

    /// The runner used to launch commands.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Executes every stale build node of `graph`, updating `state`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] when the graph cannot be ordered and
    /// [`GraphError::StateIo`] when an input cannot be fingerprinted. Command
    /// failures are reported in the returned [`ExecutionReport`].
    pub fn execute(
        &self,
        graph: &BuildGraph,
        state: &mut BuildState,
    ) -> Result<ExecutionReport, GraphError> {
        let order = graph.build_order()?;
        let mut report = ExecutionReport::default();
        let mut unusable: BTreeSet<NodeId> = BTreeSet::new();

        for node in order {
            let blocked = graph
                .dependencies_of(node.id())
                .iter()
                .any(|dep| unusable.contains(dep.id()));
            if blocked {
                debug!(
                    target: EXECUTOR_TARGET,
                    node = %node.id(),
                    "dependency failed; not running"
                );
                unusable.insert(node.id().clone());
                report.blocked.push(node.id().clone());
                continue;
            }

            let record = NodeRecord::capture(node)?;
            if is_fresh(node, &record, state) {
                debug!(target: EXECUTOR_TARGET, node = %node.id(), "up to date");
                report.skipped.push(node.id().clone());
                continue;
            }

            info!(
                target: EXECUTOR_TARGET,
                node = %node.id(),
                command = node.display_name(),
                "running build command"
            );
            match self.runner.run(node) {
                Ok(()) => {
                    warn_missing_outputs(node);
                    state.insert(node.id().clone(), record);
                    report.ran.push(node.id().clone());
                }
                Err(failure) => {
                    warn!(
                        target: EXECUTOR_TARGET,
                        node = %node.id(),
                        error = %failure,
                        "build command failed"
                    );
                    state.forget(node.id());
                    unusable.insert(node.id().clone());
                    report.failed.push((node.id().clone(), failure));
                }
            }
        }
        Ok(report)
    }
}

fn is_fresh(node: &BuildNode, current: &NodeRecord, state: &BuildState) -> bool {
    let Some(previous) = state.record(node.id()) else {
        return false;
    };
    previous == current && node.outputs().iter().all(|output| output.exists())
}

fn warn_missing_outputs(node: &BuildNode) {
    for output in node.outputs() {
        if !output.exists() {
            warn!(
                target: EXECUTOR_TARGET,
                node = %node.id(),
                output = %output.display(),
                "command finished without producing a declared output"
            );
        }
    }
}
