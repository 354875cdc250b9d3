//! Unit and behavioural tests for the build graph.

use std::path::{Path, PathBuf};

use crate::node::{BuildNode, CommandLine, NodeId, NodeOwner};


fn owner(target: &str, plugin: &str) -> NodeOwner {
    NodeOwner::new(target, plugin)
}

/// Builds the `index`-th build node of `owner` reading `inputs` and writing
/// `outputs`.
fn build_node(owner: &NodeOwner, index: usize, inputs: &[&Path], outputs: &[&Path]) -> BuildNode {
    BuildNode::build(
        NodeId::for_command(owner, index),
        owner.clone(),
        format!("step {index}"),
        CommandLine::new("/usr/bin/tool", vec![format!("--step={index}")]),
        inputs.iter().map(|path| path.to_path_buf()).collect(),
        outputs.iter().map(|path| path.to_path_buf()).collect(),
    )
}

fn prebuild_node(owner: &NodeOwner, index: usize, directory: &Path) -> BuildNode {
    BuildNode::prebuild(
        NodeId::for_command(owner, index),
        owner.clone(),
        "generate",
        CommandLine::new("/usr/bin/gen", Vec::new()),
        Vec::new(),
        directory.to_path_buf(),
    )
}

fn paths(items: &[&str]) -> Vec<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}
