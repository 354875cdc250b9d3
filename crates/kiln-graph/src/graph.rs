//! Build graph with producer indexing and a generated-file ledger.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::error::GraphError;
use crate::node::{BuildNode, NodeId, NodeKind, NodeOwner};

/// Files generated by one (target, plugin) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct GeneratedFiles {
    declared: Vec<PathBuf>,
    discovered: BTreeMap<PathBuf, Vec<PathBuf>>,
}

impl GeneratedFiles {
    fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.declared
            .iter()
            .chain(self.discovered.values().flatten())
    }
}

/// The spliced build graph.
///
/// Nodes keep insertion order, which is the order in which pairs were
/// spliced. Edges are implicit: a node depends on whichever node declares
/// one of its inputs as an output.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    nodes: Vec<BuildNode>,
    index: HashMap<NodeId, usize>,
    producers: HashMap<PathBuf, NodeId>,
    pairs: Vec<NodeOwner>,
    generated: HashMap<NodeOwner, GeneratedFiles>,
}

impl BuildGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts all nodes emitted by one pair, or none of them.
    ///
    /// Declared outputs of build nodes are recorded as generated files of the
    /// pair. Registering a pair with no nodes still records it, so later
    /// queries see it in splice order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] or [`GraphError::DuplicateOutput`]
    /// when the nodes collide with each other or with the graph.
    pub fn insert_pair(
        &mut self,
        owner: &NodeOwner,
        nodes: Vec<BuildNode>,
    ) -> Result<(), GraphError> {
        self.check_insertable(&nodes)?;

        self.register_pair(owner);
        for node in nodes {
            if node.kind() == NodeKind::Build {
                let entry = self.generated.entry(node.owner().clone()).or_default();
                for output in node.outputs() {
                    if !entry.declared.contains(output) {
                        entry.declared.push(output.clone());
                    }
                }
            }
            self.push_node(node);
        }
        Ok(())
    }

    /// Removes every node and generated file of `owner`.
    pub fn remove_pair(&mut self, owner: &NodeOwner) {
        let retained: Vec<BuildNode> = std::mem::take(&mut self.nodes)
            .into_iter()
            .filter(|node| node.owner() != owner)
            .collect();
        self.index.clear();
        self.producers.clear();
        for node in retained {
            self.push_node(node);
        }
        self.generated.remove(owner);
        self.pairs.retain(|pair| pair != owner);
    }

    /// Records the files a prebuild scan found in `directory`.
    ///
    /// Returns `true` when the set differs from the one previously recorded
    /// for the same directory in this graph.
    pub fn record_discovered(
        &mut self,
        owner: &NodeOwner,
        directory: &Path,
        mut files: Vec<PathBuf>,
    ) -> bool {
        files.sort();
        files.dedup();
        self.register_pair(owner);
        let entry = self.generated.entry(owner.clone()).or_default();
        let previous = entry.discovered.insert(directory.to_path_buf(), files);
        previous.as_ref() != entry.discovered.get(directory)
    }

    /// Merges another graph into this one, atomically.
    ///
    /// # Errors
    ///
    /// Returns the first collision found; `self` is left untouched.
    pub fn merge(&mut self, other: Self) -> Result<(), GraphError> {
        self.check_insertable(&other.nodes)?;
        for owner in &other.pairs {
            self.register_pair(owner);
        }
        for (owner, files) in other.generated {
            self.generated.insert(owner, files);
        }
        for node in other.nodes {
            self.push_node(node);
        }
        Ok(())
    }

    /// Returns the node with the given ID.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&BuildNode> {
        self.index.get(id).and_then(|&idx| self.nodes.get(idx))
    }

    /// Returns the node with the given ID, or an error if not found.
    ///
    /// # Errors
    /// Returns `GraphError::NodeNotFound` if no node with the given ID exists.
    pub fn get_node(&self, id: &NodeId) -> Result<&BuildNode, GraphError> {
        self.node(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))
    }

    /// Returns an iterator over all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &BuildNode> {
        self.nodes.iter()
    }

    /// Returns the nodes emitted by `owner`.
    pub fn nodes_of<'a>(
        &'a self,
        owner: &'a NodeOwner,
    ) -> impl Iterator<Item = &'a BuildNode> + 'a {
        self.nodes.iter().filter(move |node| node.owner() == owner)
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the node declaring `path` as an output.
    #[must_use]
    pub fn producer_of(&self, path: &Path) -> Option<&BuildNode> {
        self.producers.get(path).and_then(|id| self.node(id))
    }

    /// Returns the nodes producing the inputs of `id`.
    #[must_use]
    pub fn dependencies_of(&self, id: &NodeId) -> Vec<&BuildNode> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        node.inputs()
            .iter()
            .filter_map(|input| self.producer_of(input))
            .filter(|producer| producer.id() != id && seen.insert(producer.id().clone()))
            .collect()
    }

    /// Pairs in the order they were spliced.
    #[must_use]
    pub fn pairs(&self) -> &[NodeOwner] {
        &self.pairs
    }

    /// Files generated by `owner`: declared build outputs, then files found by
    /// prebuild scans.
    #[must_use]
    pub fn generated_files(&self, owner: &NodeOwner) -> Vec<PathBuf> {
        let mut seen = BTreeSet::new();
        self.generated
            .get(owner)
            .into_iter()
            .flat_map(GeneratedFiles::files)
            .filter(|path| seen.insert((*path).clone()))
            .cloned()
            .collect()
    }

    /// Generated files feeding the compilation of `target`, in splice order.
    #[must_use]
    pub fn compilation_inputs(&self, target: &str) -> Vec<PathBuf> {
        let mut seen = BTreeSet::new();
        let mut files = Vec::new();
        for owner in self.pairs.iter().filter(|owner| owner.target() == target) {
            for path in self.generated_files(owner) {
                if seen.insert(path.clone()) {
                    files.push(path);
                }
            }
        }
        files
    }

    /// Prebuild output directories declared for `target`, with their owners.
    pub fn prebuild_directories<'a>(
        &'a self,
        target: &'a str,
    ) -> impl Iterator<Item = (&'a NodeOwner, &'a Path)> + 'a {
        self.nodes
            .iter()
            .filter(move |node| node.owner().target() == target)
            .filter_map(|node| node.output_directory().map(|dir| (node.owner(), dir)))
    }

    /// Build nodes ordered so every node follows the nodes producing its
    /// inputs. Ties keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] when producer edges form a cycle.
    pub fn build_order(&self) -> Result<Vec<&BuildNode>, GraphError> {
        let build_nodes: Vec<&BuildNode> = self
            .nodes
            .iter()
            .filter(|node| node.kind() == NodeKind::Build)
            .collect();

        let mut pending: HashMap<&NodeId, usize> = HashMap::new();
        let mut dependents: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for node in &build_nodes {
            let deps = self.dependencies_of(node.id());
            pending.insert(node.id(), deps.len());
            for dep in deps {
                dependents.entry(dep.id()).or_default().push(node.id());
            }
        }

        let mut ready: VecDeque<&NodeId> = build_nodes
            .iter()
            .map(|node| node.id())
            .filter(|id| pending.get(id).copied() == Some(0))
            .collect();
        let mut order = Vec::with_capacity(build_nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(self.get_node(id)?);
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        if order.len() < build_nodes.len() {
            let stuck = build_nodes
                .iter()
                .find(|node| !order.iter().any(|done| done.id() == node.id()))
                .map(|node| node.id().clone());
            if let Some(id) = stuck {
                return Err(GraphError::Cycle(id));
            }
        }
        Ok(order)
    }

    fn check_insertable(&self, nodes: &[BuildNode]) -> Result<(), GraphError> {
        let mut ids = BTreeSet::new();
        let mut outputs: HashMap<&Path, &NodeId> = HashMap::new();
        for node in nodes {
            if self.index.contains_key(node.id()) || !ids.insert(node.id()) {
                return Err(GraphError::DuplicateNode(node.id().clone()));
            }
            for output in node.outputs() {
                let existing = self
                    .producers
                    .get(output)
                    .or_else(|| outputs.get(output.as_path()).copied());
                if let Some(existing) = existing {
                    return Err(GraphError::DuplicateOutput {
                        path: output.clone(),
                        existing: existing.clone(),
                        conflicting: node.id().clone(),
                    });
                }
                outputs.insert(output, node.id());
            }
        }
        Ok(())
    }

    fn register_pair(&mut self, owner: &NodeOwner) {
        if !self.pairs.contains(owner) {
            self.pairs.push(owner.clone());
        }
    }

    fn push_node(&mut self, node: BuildNode) {
        for output in node.outputs() {
            self.producers.insert(output.clone(), node.id().clone());
        }
        self.index.insert(node.id().clone(), self.nodes.len());
        self.nodes.push(node);
    }
}
