//! Incremental build graph for plugin-emitted commands.
//!
//! Plugins describe work as commands; the splicer turns those into
//! [`BuildNode`]s inside a [`BuildGraph`]. The graph tracks which node
//! produces which file, which files each (target, plugin) pair generated, and
//! which generated files feed a target's compilation.
//!
//! # Core types
//!
//! - [`BuildNode`] - one command with declared input and output edges
//! - [`BuildGraph`] - nodes indexed by id and by produced path
//! - [`IncrementalExecutor`] - runs build nodes, skipping fresh ones
//! - [`BuildState`] - persisted fingerprints from the last successful runs
//!
//! A build node re-runs only when an input's content changed since its last
//! successful run, its command line changed, or a declared output is missing.
//! Prebuild nodes are planning-time work and never pass through the executor.

mod error;
mod executor;
pub mod fingerprint;
mod graph;
mod node;
mod state;

pub use error::GraphError;
pub use executor::{CommandRunner, ExecutionReport, IncrementalExecutor, RunFailure};
pub use graph::BuildGraph;
pub use node::{BuildNode, CommandLine, NodeId, NodeKind, NodeOwner};
pub use state::{BuildState, NodeRecord};

#[cfg(test)]
mod tests;
