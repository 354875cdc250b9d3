//! Error types for build graph operations.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::node::NodeId;

/// Errors returned by build graph operations.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// Two nodes share an identifier.
    #[error("node '{0}' is already present in the build graph")]
    DuplicateNode(NodeId),

    /// Two nodes declare the same output file.
    #[error("output {} is declared by both '{existing}' and '{conflicting}'", path.display())]
    DuplicateOutput {
        /// Contested output path.
        path: PathBuf,
        /// Node that already produces the path.
        existing: NodeId,
        /// Node that attempted to produce it again.
        conflicting: NodeId,
    },

    /// The producer edges form a cycle.
    #[error("build graph contains a dependency cycle through '{0}'")]
    Cycle(NodeId),

    /// The requested node was not found in the graph.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Reading or writing the persisted build state failed.
    #[error("failed to access build state at {}: {source}", path.display())]
    StateIo {
        /// State file location.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The persisted build state could not be parsed or encoded.
    #[error("build state at {} is malformed: {source}", path.display())]
    StateFormat {
        /// State file location.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },
}

impl GraphError {
    /// Creates a new `StateIo` error.
    #[must_use]
    pub fn state_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StateIo {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new `StateFormat` error.
    #[must_use]
    pub fn state_format(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::StateFormat {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}
