//! Planner state carried between planning passes.
//!
//! For every (target, plugin) pair the state keeps the last successful
//! invocation output under its invocation key, and the files each prebuild
//! output directory held at the end of the pass. A plugin is re-invoked
//! only when its key changes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_graph::NodeOwner;
use kiln_graph::fingerprint::{FingerprintBuilder, digest_file};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::declaration::PluginDeclaration;
use crate::error::StateError;
use crate::protocol::{self, InvocationOutput, PROTOCOL_VERSION, TargetBuildContext, ToolResolution};

/// Tracing target for cache operations.
const CACHE_TARGET: &str = "kiln_plugins::cache";

/// Output of a successful invocation with the key it was produced under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedInvocation {
    key: String,
    output: InvocationOutput,
}

impl CachedInvocation {
    /// Creates a cache entry.
    #[must_use]
    pub fn new(key: impl Into<String>, output: InvocationOutput) -> Self {
        Self {
            key: key.into(),
            output,
        }
    }

    /// Invocation key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cached output.
    #[must_use]
    pub const fn output(&self) -> &InvocationOutput {
        &self.output
    }
}

/// What the planner remembers about one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairState {
    owner: NodeOwner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation: Option<CachedInvocation>,
    #[serde(default)]
    discovered: BTreeMap<PathBuf, Vec<PathBuf>>,
}

impl PairState {
    /// Creates a state record for `owner`.
    #[must_use]
    pub const fn new(
        owner: NodeOwner,
        invocation: Option<CachedInvocation>,
        discovered: BTreeMap<PathBuf, Vec<PathBuf>>,
    ) -> Self {
        Self {
            owner,
            invocation,
            discovered,
        }
    }

    /// Pair the record describes.
    #[must_use]
    pub const fn owner(&self) -> &NodeOwner {
        &self.owner
    }

    /// Last cached invocation, if any.
    #[must_use]
    pub const fn invocation(&self) -> Option<&CachedInvocation> {
        self.invocation.as_ref()
    }

    /// Prebuild output directories and the files they held.
    #[must_use]
    pub const fn discovered(&self) -> &BTreeMap<PathBuf, Vec<PathBuf>> {
        &self.discovered
    }
}

/// Persisted planner state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanState {
    #[serde(default)]
    pairs: Vec<PairState>,
}

impl PlanState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the state at `path`; a missing file yields an empty state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = fs::read(path).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StateError::Format {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })
    }

    /// Writes the state to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let io_error = |source| StateError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|source| StateError::Format {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;
        fs::write(path, json).map_err(io_error)
    }

    /// Record for `owner`, if any.
    #[must_use]
    pub fn pair(&self, owner: &NodeOwner) -> Option<&PairState> {
        self.pairs.iter().find(|pair| pair.owner() == owner)
    }

    /// Cached output of `owner` when it was produced under `key`.
    #[must_use]
    pub fn cached_output(&self, owner: &NodeOwner, key: &str) -> Option<&InvocationOutput> {
        self.pair(owner)
            .and_then(PairState::invocation)
            .filter(|cached| cached.key() == key)
            .map(CachedInvocation::output)
    }

    /// Replaces the record of the pair `record` describes.
    pub fn update(&mut self, record: PairState) {
        self.pairs.retain(|pair| pair.owner != record.owner);
        self.pairs.push(record);
    }

    /// Number of recorded pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns `true` when no pair is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Key identifying everything an invocation's output may depend on: the
/// protocol version, the encoded input, the content of every input file, the
/// plugin executable's content and the plugin arguments.
///
/// Returns `None` when the key cannot be computed, in which case the plugin
/// must be invoked.
#[must_use]
pub fn invocation_key(
    plugin: &PluginDeclaration,
    context: &TargetBuildContext,
    tools: &ToolResolution,
) -> Option<String> {
    let input = protocol::encode(context, tools).ok()?;
    let mut builder = FingerprintBuilder::new()
        .field(PROTOCOL_VERSION.to_string().as_bytes())
        .field(&input);

    for file in context.input_files() {
        let digest = match digest_file(file.path()) {
            Ok(value) => value,
            Err(error) => {
                debug!(
                    target: CACHE_TARGET,
                    path = %file.path().display(),
                    %error,
                    "cannot fingerprint input file"
                );
                return None;
            }
        };
        builder = builder
            .field(file.path().as_os_str().as_encoded_bytes())
            .field(digest.as_deref().unwrap_or("-").as_bytes());
    }

    let executable = digest_file(plugin.executable()).ok().flatten()?;
    builder = builder.field(executable.as_bytes());
    for arg in plugin.args() {
        builder = builder.field(arg.as_bytes());
    }
    Some(builder.finish())
}

#[cfg(test)]
mod tests;
