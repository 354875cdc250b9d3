//! Persisted fingerprints of the last successful node runs.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::fingerprint::digest_file;
use crate::node::{BuildNode, NodeId};

/// Fingerprint of one successful run of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    command_digest: String,
    inputs: BTreeMap<PathBuf, Option<String>>,
}

impl NodeRecord {
    /// Captures the current fingerprint of `node`.
    ///
    /// Missing inputs are recorded as `None` so their later appearance counts
    /// as a change.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::StateIo`] when an input exists but cannot be read.
    pub fn capture(node: &BuildNode) -> Result<Self, GraphError> {
        let mut inputs = BTreeMap::new();
        for input in node.inputs() {
            let digest = digest_file(input).map_err(|source| GraphError::state_io(input, source))?;
            inputs.insert(input.clone(), digest);
        }
        Ok(Self {
            command_digest: node.command().digest(),
            inputs,
        })
    }

    /// Digest of the command line at the time of the run.
    #[must_use]
    pub fn command_digest(&self) -> &str {
        &self.command_digest
    }

    /// Input digests at the time of the run.
    #[must_use]
    pub const fn inputs(&self) -> &BTreeMap<PathBuf, Option<String>> {
        &self.inputs
    }
}

/// Records of every node that last ran successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    records: BTreeMap<NodeId, NodeRecord>,
}

impl BuildState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the state stored at `path`; a missing file yields an empty state.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::StateIo`] or [`GraphError::StateFormat`] when the
    /// file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| GraphError::state_format(path, source)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(GraphError::state_io(path, error)),
        }
    }

    /// Writes the state to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::StateIo`] or [`GraphError::StateFormat`] on
    /// failure.
    pub fn save(&self, path: &Path) -> Result<(), GraphError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| GraphError::state_io(parent, source))?;
        }
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|source| GraphError::state_format(path, source))?;
        fs::write(path, bytes).map_err(|source| GraphError::state_io(path, source))
    }

    /// Record for `id`, if the node has run successfully before.
    #[must_use]
    pub fn record(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.records.get(id)
    }

    /// Stores the record of a successful run.
    pub fn insert(&mut self, id: NodeId, record: NodeRecord) {
        self.records.insert(id, record);
    }

    /// Forgets `id` so its next execution is unconditional.
    pub fn forget(&mut self, id: &NodeId) {
        self.records.remove(id);
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
