//! Splicing of plugin commands into the build graph.
//!
//! Every command becomes one [`BuildNode`] owned by the (target, plugin) pair
//! that emitted it. Paths are normalised lexically before validation, so a
//! declared `work/../../etc/passwd` is judged by where it actually points.
//! Splicing is all-or-nothing: the nodes are built and validated first, and
//! [`BuildGraph::insert_pair`] rejects collisions without touching the graph.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use kiln_graph::{BuildGraph, BuildNode, CommandLine, NodeId, NodeOwner};
use tracing::debug;

use crate::error::SpliceError;
use crate::protocol::{BuildCommand, Command, PrebuildCommand, TargetBuildContext};

/// Tracing target for splice operations.
const SPLICE_TARGET: &str = "kiln_plugins::splicer";

/// Directories a plugin's commands may read from and write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    /// Roots for the invocation described by `context`: the target
    /// directory, the work directory and the built-products directory.
    #[must_use]
    pub fn for_context(context: &TargetBuildContext) -> Self {
        Self::new([
            context.target_directory(),
            context.work_directory(),
            context.built_products_directory(),
        ])
    }

    /// Creates a root set from arbitrary directories.
    #[must_use]
    pub fn new<'a>(roots: impl IntoIterator<Item = &'a Path>) -> Self {
        Self {
            roots: roots.into_iter().map(normalise).collect(),
        }
    }

    /// Returns `true` when normalised `path` lies at or beneath a root.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }
}

/// Counts of what one splice added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpliceSummary {
    /// Build nodes added.
    pub build_nodes: usize,
    /// Prebuild nodes added.
    pub prebuild_nodes: usize,
}

/// Splices `commands` emitted by `plugin` for the target in `context`.
///
/// # Errors
///
/// Returns [`SpliceError`] when a path is relative, lies outside the allowed
/// roots, a prebuild output directory overlaps another one of the same
/// target, or an output is already produced elsewhere. The graph is left
/// unchanged.
pub fn splice(
    context: &TargetBuildContext,
    plugin: &str,
    commands: &[Command],
    graph: &mut BuildGraph,
) -> Result<SpliceSummary, SpliceError> {
    let owner = NodeOwner::new(context.target_name(), plugin);
    let roots = AllowedRoots::for_context(context);
    let mut summary = SpliceSummary::default();
    let mut nodes = Vec::with_capacity(commands.len());

    for (index, command) in commands.iter().enumerate() {
        let id = NodeId::for_command(&owner, index);
        let node = match command {
            Command::BuildCommand(build) => {
                summary.build_nodes += 1;
                build_node(id, &owner, &roots, build)?
            }
            Command::PrebuildCommand(prebuild) => {
                summary.prebuild_nodes += 1;
                prebuild_node(id, &owner, &roots, prebuild)?
            }
        };
        nodes.push(node);
    }

    check_prebuild_overlap(&owner, &nodes, graph)?;
    graph.insert_pair(&owner, nodes)?;
    debug!(
        target: SPLICE_TARGET,
        %owner,
        build_nodes = summary.build_nodes,
        prebuild_nodes = summary.prebuild_nodes,
        "spliced plugin commands"
    );
    Ok(summary)
}

fn build_node(
    id: NodeId,
    owner: &NodeOwner,
    roots: &AllowedRoots,
    command: &BuildCommand,
) -> Result<BuildNode, SpliceError> {
    let line = command_line(
        owner,
        command.executable(),
        command.arguments(),
        command.working_dir(),
        command.environment(),
    )?;
    let inputs = checked_inputs(owner, roots, command.input_files(), line.executable())?;
    let outputs = command
        .output_files()
        .iter()
        .map(|path| checked_path(owner, roots, path, "output"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BuildNode::build(
        id,
        owner.clone(),
        command.display_name(),
        line,
        inputs,
        outputs,
    ))
}

fn prebuild_node(
    id: NodeId,
    owner: &NodeOwner,
    roots: &AllowedRoots,
    command: &PrebuildCommand,
) -> Result<BuildNode, SpliceError> {
    let line = command_line(
        owner,
        command.executable(),
        command.arguments(),
        command.working_dir(),
        command.environment(),
    )?;
    let inputs = checked_inputs(owner, roots, command.input_files(), line.executable())?;
    let directory = checked_path(
        owner,
        roots,
        command.output_files_directory(),
        "output directory",
    )?;
    Ok(BuildNode::prebuild(
        id,
        owner.clone(),
        command.display_name(),
        line,
        inputs,
        directory,
    ))
}

fn command_line(
    owner: &NodeOwner,
    executable: &Path,
    arguments: &[String],
    working_directory: Option<&Path>,
    environment: &BTreeMap<String, String>,
) -> Result<CommandLine, SpliceError> {
    let executable = absolute(owner, executable)?;
    let working_directory = working_directory
        .map(|dir| absolute(owner, dir))
        .transpose()?;
    Ok(CommandLine::new(executable, arguments.to_vec())
        .with_working_directory(working_directory)
        .with_environment(environment.clone()))
}

/// Inputs must lie within the roots, except the command's own executable,
/// which commonly lives in a tool dependency's build directory.
fn checked_inputs(
    owner: &NodeOwner,
    roots: &AllowedRoots,
    inputs: &[PathBuf],
    executable: &Path,
) -> Result<Vec<PathBuf>, SpliceError> {
    inputs
        .iter()
        .map(|path| {
            let normalised = absolute(owner, path)?;
            if normalised == executable || roots.contains(&normalised) {
                Ok(normalised)
            } else {
                Err(SpliceError::OutsideAllowedRoots {
                    owner: owner.clone(),
                    path: normalised,
                    role: "input",
                })
            }
        })
        .collect()
}

fn checked_path(
    owner: &NodeOwner,
    roots: &AllowedRoots,
    path: &Path,
    role: &'static str,
) -> Result<PathBuf, SpliceError> {
    let normalised = absolute(owner, path)?;
    if roots.contains(&normalised) {
        Ok(normalised)
    } else {
        Err(SpliceError::OutsideAllowedRoots {
            owner: owner.clone(),
            path: normalised,
            role,
        })
    }
}

fn absolute(owner: &NodeOwner, path: &Path) -> Result<PathBuf, SpliceError> {
    if path.is_absolute() {
        Ok(normalise(path))
    } else {
        Err(SpliceError::RelativePath {
            owner: owner.clone(),
            path: path.to_path_buf(),
        })
    }
}

fn check_prebuild_overlap(
    owner: &NodeOwner,
    nodes: &[BuildNode],
    graph: &BuildGraph,
) -> Result<(), SpliceError> {
    let mut claimed: Vec<(NodeOwner, PathBuf)> = graph
        .prebuild_directories(owner.target())
        .map(|(existing, dir)| (existing.clone(), dir.to_path_buf()))
        .collect();

    for directory in nodes.iter().filter_map(BuildNode::output_directory) {
        let clash = claimed
            .iter()
            .find(|(_, other)| directory.starts_with(other) || other.starts_with(directory));
        if let Some((other_owner, other)) = clash {
            return Err(SpliceError::OverlappingOutputDirectories {
                owner: owner.clone(),
                directory: directory.to_path_buf(),
                other_owner: other_owner.clone(),
                other: other.clone(),
            });
        }
        claimed.push((owner.clone(), directory.to_path_buf()));
    }
    Ok(())
}

/// Removes `.` components and resolves `..` against the preceding component
/// without consulting the filesystem. `..` at the root stays at the root.
#[must_use]
pub fn normalise(path: &Path) -> PathBuf {
    let mut normalised = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalised.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalised.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalised.push(component),
            },
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalised.push(component);
            }
        }
    }
    normalised
}
