//! Domain errors raised while registering, invoking and splicing plugins.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. I/O errors are wrapped in `Arc`
//! to satisfy the `result_large_err` Clippy lint and keep errors cloneable.
//! Every error that reaches the planner names the plugin and the target.

use std::path::PathBuf;
use std::sync::Arc;

use kiln_graph::{GraphError, NodeOwner, RunFailure};
use thiserror::Error;

use crate::host::InvocationFailure;

/// Errors raised while registering plugin declarations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// A plugin declaration failed validation.
    #[error("invalid declaration for plugin '{name}': {message}")]
    InvalidDeclaration {
        /// Plugin name as declared.
        name: String,
        /// Description of the validation failure.
        message: String,
    },

    /// A plugin with the same name is already registered.
    #[error("plugin '{name}' is already registered")]
    Duplicate {
        /// Plugin name.
        name: String,
    },
}

/// Errors raised while assembling a [`TargetBuildContext`](crate::TargetBuildContext).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A target named in the dependency graph does not exist.
    #[error("target '{target}' depends on unknown target '{dependency}'")]
    UnknownDependency {
        /// Target declaring the dependency.
        target: String,
        /// Name that could not be resolved.
        dependency: String,
    },

    /// The target dependency graph contains a cycle.
    #[error("target dependency cycle detected through '{target}'")]
    DependencyCycle {
        /// A target on the cycle.
        target: String,
    },

    /// The requested plugin usage position does not exist on the target.
    #[error("target '{target}' has no plugin usage at position {position}")]
    NoSuchUsage {
        /// Target name.
        target: String,
        /// Requested position.
        position: usize,
    },
}

/// Errors raised while splicing plugin commands into the build graph.
///
/// Any splice error leaves the graph unchanged.
#[derive(Debug, Clone, Error)]
pub enum SpliceError {
    /// A command referenced a path that is not absolute.
    #[error("{owner} emitted a command with relative path {}", path.display())]
    RelativePath {
        /// Pair whose command was rejected.
        owner: NodeOwner,
        /// Offending path.
        path: PathBuf,
    },

    /// A declared path lies outside the target, work and built-products
    /// directories.
    #[error(
        "{owner} declared {role} {} outside the target, work and built-products directories",
        path.display()
    )]
    OutsideAllowedRoots {
        /// Pair whose command was rejected.
        owner: NodeOwner,
        /// Offending path.
        path: PathBuf,
        /// `input`, `output` or `output directory`.
        role: &'static str,
    },

    /// Two prebuild commands on one target declared overlapping output
    /// directories.
    #[error(
        "{owner} declared prebuild output directory {} overlapping {} of {other_owner}",
        directory.display(),
        other.display()
    )]
    OverlappingOutputDirectories {
        /// Pair whose command was rejected.
        owner: NodeOwner,
        /// Directory declared by the rejected command.
        directory: PathBuf,
        /// Pair owning the directory it overlaps.
        other_owner: NodeOwner,
        /// Directory it overlaps.
        other: PathBuf,
    },

    /// The graph rejected the nodes, for example over a duplicate output.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors raised while running the prebuild commands of one pair.
#[derive(Debug, Clone, Error)]
pub enum PrebuildError {
    /// The output directory could not be created or scanned.
    #[error("cannot prepare prebuild output directory {}: {source}", directory.display())]
    Directory {
        /// Output directory.
        directory: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The prebuild command failed.
    #[error("prebuild command '{display_name}' failed: {source}")]
    Command {
        /// Display name of the command.
        display_name: String,
        /// Why the command failed.
        #[source]
        source: RunFailure,
    },
}

/// Failure of one (target, plugin) step during a planning pass.
#[derive(Debug, Clone, Error)]
pub enum PlanningError {
    /// The target uses a plugin that was never declared.
    #[error("target '{target}' uses undeclared plugin '{plugin}'")]
    UnknownPlugin {
        /// Plugin name.
        plugin: String,
        /// Target name.
        target: String,
    },

    /// A dependency tool of the plugin could not be located.
    #[error(
        "plugin '{plugin}' on target '{target}' needs tool '{tool}', which no dependency provides; \
         add the executable or binary target that provides '{tool}' to the plugin's dependencies"
    )]
    MissingTool {
        /// Tool name.
        tool: String,
        /// Plugin name.
        plugin: String,
        /// Target name.
        target: String,
    },

    /// The invocation context could not be built.
    #[error("cannot build context for plugin '{plugin}' on target '{target}': {source}")]
    Context {
        /// Plugin name.
        plugin: String,
        /// Target name.
        target: String,
        /// Underlying error.
        #[source]
        source: ContextError,
    },

    /// The plugin invocation failed.
    #[error(transparent)]
    Invocation(Box<InvocationFailure>),

    /// The plugin's commands could not be spliced.
    #[error("cannot splice commands of plugin '{plugin}' on target '{target}': {source}")]
    Splice {
        /// Plugin name.
        plugin: String,
        /// Target name.
        target: String,
        /// Underlying error.
        #[source]
        source: SpliceError,
    },

    /// A prebuild command of the plugin failed.
    #[error("prebuild of plugin '{plugin}' on target '{target}' failed: {source}")]
    Prebuild {
        /// Plugin name.
        plugin: String,
        /// Target name.
        target: String,
        /// Underlying error.
        #[source]
        source: PrebuildError,
    },

    /// The target's graph fragment collided with another target's.
    #[error("cannot merge build commands of target '{target}': {source}")]
    Merge {
        /// Target name.
        target: String,
        /// Underlying error.
        #[source]
        source: GraphError,
    },

    /// A planning worker stopped without reporting a result.
    #[error("planning worker for target '{target}' stopped unexpectedly")]
    WorkerLost {
        /// Target name.
        target: String,
    },
}

impl From<InvocationFailure> for PlanningError {
    fn from(failure: InvocationFailure) -> Self {
        Self::Invocation(Box::new(failure))
    }
}

/// Errors raised while loading or saving the planner state.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    /// Reading or writing the state file failed.
    #[error("failed to access plan state at {}: {source}", path.display())]
    Io {
        /// State file location.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The state file could not be parsed or encoded.
    #[error("plan state at {} is malformed: {source}", path.display())]
    Format {
        /// State file location.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },
}

/// Errors raised while loading a package snapshot.
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    /// The snapshot file could not be read.
    #[error("failed to read package snapshot {}: {source}", path.display())]
    Io {
        /// Snapshot location.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The snapshot is not valid JSON of the expected shape.
    #[error("package snapshot {} is malformed: {source}", path.display())]
    Format {
        /// Snapshot location.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// Two targets share a name.
    #[error("target '{name}' is declared more than once")]
    DuplicateTarget {
        /// Target name.
        name: String,
    },

    /// A target lists the same plugin twice.
    #[error("target '{target}' uses plugin '{plugin}' more than once")]
    RepeatedPlugin {
        /// Target name.
        target: String,
        /// Plugin name.
        plugin: String,
    },
}

#[cfg(test)]
mod tests;
