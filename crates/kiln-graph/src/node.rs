//! Build graph node types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fingerprint::FingerprintBuilder;

/// Stable identifier of a build node.
///
/// Identifiers are derived from the owning (target, plugin) pair and the
/// command's position in the plugin's output, so a re-planned graph assigns
/// the same identifier to the same command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Builds the identifier of the `index`-th command of `owner`.
    #[must_use]
    pub fn for_command(owner: &NodeOwner, index: usize) -> Self {
        Self(format!("{}/{}#{index}", owner.target(), owner.plugin()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The (target, plugin) pair whose invocation emitted a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeOwner {
    target: String,
    plugin: String,
}

impl NodeOwner {
    /// Creates an owner for `plugin` applied to `target`.
    #[must_use]
    pub fn new(target: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            plugin: plugin.into(),
        }
    }

    /// Target name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Plugin identity.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }
}

impl fmt::Display for NodeOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin '{}' on target '{}'", self.plugin, self.target)
    }
}

/// Whether a node participates in incremental builds or runs every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Declared inputs and outputs; skipped while fresh.
    Build,
    /// Runs once per planning pass; outputs discovered by directory scan.
    Prebuild,
}

/// Executable, arguments, environment and working directory of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    executable: PathBuf,
    arguments: Vec<String>,
    working_directory: Option<PathBuf>,
    environment: BTreeMap<String, String>,
}

impl CommandLine {
    /// Creates a command line running `executable` with `arguments`.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>, arguments: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            arguments,
            working_directory: None,
            environment: BTreeMap::new(),
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_directory(mut self, dir: Option<PathBuf>) -> Self {
        self.working_directory = dir;
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Program to execute.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Arguments passed to the program.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Working directory, when declared.
    #[must_use]
    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Environment variables set for the command.
    #[must_use]
    pub const fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Digest of everything that affects what the command does.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut builder = FingerprintBuilder::new()
            .field(self.executable.as_os_str().as_encoded_bytes());
        for argument in &self.arguments {
            builder = builder.field(argument.as_bytes());
        }
        let dir = self
            .working_directory
            .as_deref()
            .map(|dir| dir.as_os_str().as_encoded_bytes())
            .unwrap_or_default();
        builder = builder.field(dir);
        for (key, value) in &self.environment {
            builder = builder.field(key.as_bytes()).field(value.as_bytes());
        }
        builder.finish()
    }
}

/// One command in the build graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildNode {
    id: NodeId,
    owner: NodeOwner,
    kind: NodeKind,
    display_name: String,
    command: CommandLine,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    output_directory: Option<PathBuf>,
}

impl BuildNode {
    /// Creates a build node with declared inputs and outputs.
    #[must_use]
    pub fn build(
        id: NodeId,
        owner: NodeOwner,
        display_name: impl Into<String>,
        command: CommandLine,
        inputs: Vec<PathBuf>,
        outputs: Vec<PathBuf>,
    ) -> Self {
        Self {
            id,
            owner,
            kind: NodeKind::Build,
            display_name: display_name.into(),
            command,
            inputs,
            outputs,
            output_directory: None,
        }
    }

    /// Creates a prebuild node writing into `output_directory`.
    #[must_use]
    pub fn prebuild(
        id: NodeId,
        owner: NodeOwner,
        display_name: impl Into<String>,
        command: CommandLine,
        inputs: Vec<PathBuf>,
        output_directory: PathBuf,
    ) -> Self {
        Self {
            id,
            owner,
            kind: NodeKind::Prebuild,
            display_name: display_name.into(),
            command,
            inputs,
            outputs: Vec::new(),
            output_directory: Some(output_directory),
        }
    }

    /// Node identifier.
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        &self.id
    }

    /// Pair that emitted the node.
    #[must_use]
    pub const fn owner(&self) -> &NodeOwner {
        &self.owner
    }

    /// Build or prebuild.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Human-readable description shown while the command runs.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// What to run.
    #[must_use]
    pub const fn command(&self) -> &CommandLine {
        &self.command
    }

    /// Declared input files.
    #[must_use]
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Declared output files; empty for prebuild nodes.
    #[must_use]
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// Output directory of a prebuild node.
    #[must_use]
    pub fn output_directory(&self) -> Option<&Path> {
        self.output_directory.as_deref()
    }
}
