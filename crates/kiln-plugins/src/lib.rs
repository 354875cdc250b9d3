//! Build-tool plugin execution for Kiln.
//!
//! Plugins are short-lived, sandboxed processes that a build system invokes
//! once per (target, plugin) pair while planning. Each invocation receives a
//! [`TargetBuildContext`] as one JSON document on stdin and answers with one
//! document of [`Command`]s and [`Diagnostic`]s on stdout. The commands are
//! spliced into a [`kiln_graph::BuildGraph`] whose generated files feed later
//! plugins of the same target and, finally, the target's compilation.
//!
//! # Architecture
//!
//! - [`ContextBuilder`] assembles the immutable context of one invocation
//!   from the [`PackageGraph`] and the graph spliced so far.
//! - [`protocol`] encodes the context and decodes the plugin's answer.
//! - [`PluginHost`] launches the plugin under the [`kiln_sandbox`] policy with
//!   a time budget and classifies failures.
//! - [`splicer`] validates commands and inserts them atomically.
//! - [`prebuild`] runs prebuild commands and discovers their outputs.
//! - [`BuildPlanner`] drives every target's chain of plugins and merges the
//!   results deterministically, reusing cached outputs from [`PlanState`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::time::Duration;
//!
//! use kiln_plugins::process::SandboxExecutor;
//! use kiln_plugins::{
//!     BuildPlanner, ContextBuilder, PackageSnapshot, PlanState, PluginHost,
//!     SandboxedCommandRunner,
//! };
//! use kiln_sandbox::{BirdcageIsolation, SandboxPolicy};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let snapshot = PackageSnapshot::load(Path::new("package.json"))?;
//! let registry = snapshot.registry()?;
//! let host = PluginHost::for_current_platform(
//!     SandboxExecutor::<BirdcageIsolation>::default(),
//!     Duration::from_secs(60),
//! )?;
//! let runner = SandboxedCommandRunner::new(
//!     SandboxPolicy::for_current_platform()?,
//!     SandboxExecutor::<BirdcageIsolation>::default(),
//! );
//! let planner = BuildPlanner::new(
//!     host,
//!     ContextBuilder::new(".kiln/plugins", ".kiln/products"),
//!     runner,
//! );
//! let mut state = PlanState::new();
//! let report = planner.plan(&snapshot, &registry, &snapshot, &mut state);
//! assert!(report.is_success());
//! # Ok(()) }
//! ```

pub mod cache;
pub mod command_runner;
pub mod context;
pub mod declaration;
pub mod error;
pub mod host;
pub mod package;
pub mod planner;
pub mod prebuild;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod splicer;

#[cfg(test)]
mod tests;

pub use self::cache::{PlanState, invocation_key};
pub use self::command_runner::SandboxedCommandRunner;
pub use self::context::{ContextBuilder, ToolResolver};
pub use self::declaration::{PluginCapability, PluginDeclaration};
pub use self::error::{
    ContextError, PlanningError, PluginError, PrebuildError, SnapshotError, SpliceError,
    StateError,
};
pub use self::host::{FailureReason, InvocationFailure, InvocationSuccess, PluginHost};
pub use self::package::{PackageGraph, PackageSnapshot, PluginUsage, Target};
pub use self::planner::{BuildPlanner, ChainReport, InvocationRecord, PlanReport, PlannerSettings};
pub use self::protocol::{
    BuildCommand, Command, Diagnostic, DiagnosticSeverity, InputFile, InputFileKind,
    InvocationOutput, PrebuildCommand, TargetBuildContext, TargetInfo, ToolResolution,
};
pub use self::registry::PluginRegistry;
pub use self::splicer::{SpliceSummary, splice};
