//! Assembly of per-invocation [`TargetBuildContext`] values.
//!
//! The builder is a pure function over the package graph, the build graph
//! spliced so far and a deterministic path-naming scheme. It never touches the
//! filesystem; the host creates the work directory just before launch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use kiln_graph::fingerprint::FingerprintBuilder;
use kiln_graph::{BuildGraph, NodeOwner};

use crate::error::ContextError;
use crate::package::{PackageGraph, PluginUsage, Target};
use crate::protocol::{InputFile, InputFileKind, TargetBuildContext, TargetInfo};

/// Number of hexadecimal digest characters appended to work directory names.
const WORK_DIRECTORY_DIGEST_LEN: usize = 16;

/// Locates the executables that provide a plugin's dependency tools.
pub trait ToolResolver: Sync {
    /// Absolute path of `tool` as available to plugins applied to `target`.
    fn resolve(&self, tool: &str, target: &str) -> Option<PathBuf>;
}

/// Builds invocation contexts for one build directory layout.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    work_root: PathBuf,
    built_products_directory: PathBuf,
}

impl ContextBuilder {
    /// Creates a builder that allocates work directories beneath `work_root`.
    #[must_use]
    pub fn new(
        work_root: impl Into<PathBuf>,
        built_products_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            work_root: work_root.into(),
            built_products_directory: built_products_directory.into(),
        }
    }

    /// Root beneath which work directories are allocated.
    #[must_use]
    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Built-products directory handed to every plugin.
    #[must_use]
    pub fn built_products_directory(&self) -> &Path {
        &self.built_products_directory
    }

    /// Builds the context for the plugin at `position` in `target`'s usages.
    ///
    /// Inputs are the target's sources, then its resources, then the files
    /// generated by the plugins at earlier positions as recorded in `graph`.
    /// Paths appear once, at their first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] when `position` is out of range or the
    /// dependency graph cannot be ordered.
    pub fn build(
        &self,
        target: &Target,
        position: usize,
        package: &dyn PackageGraph,
        graph: &BuildGraph,
    ) -> Result<TargetBuildContext, ContextError> {
        let usage = target
            .plugin_usages()
            .get(position)
            .ok_or_else(|| ContextError::NoSuchUsage {
                target: target.name().to_owned(),
                position,
            })?;

        let dependencies = package
            .dependency_closure(target)?
            .into_iter()
            .map(target_info)
            .collect();

        Ok(TargetBuildContext::new(
            target_info(target),
            package.package_directory().to_path_buf(),
            input_files(target, position, graph),
            dependencies,
            self.work_directory(package.package_name(), target.name(), usage),
            self.built_products_directory.clone(),
        ))
    }

    /// Work directory of the (target, plugin) pair.
    ///
    /// The readable prefix is sanitised; the digest over the full identity
    /// keeps pairs whose names sanitise alike apart.
    #[must_use]
    pub fn work_directory(&self, package: &str, target: &str, usage: &PluginUsage) -> PathBuf {
        let digest = FingerprintBuilder::new()
            .field(package.as_bytes())
            .field(target.as_bytes())
            .field(usage.package().unwrap_or_default().as_bytes())
            .field(usage.plugin().as_bytes())
            .finish();
        let short: String = digest.chars().take(WORK_DIRECTORY_DIGEST_LEN).collect();
        self.work_root
            .join(path_component(target))
            .join(format!("{}-{short}", path_component(usage.plugin())))
    }
}

fn target_info(target: &Target) -> TargetInfo {
    TargetInfo::new(target.name(), target.module_name(), target.directory())
}

fn input_files(target: &Target, position: usize, graph: &BuildGraph) -> Vec<InputFile> {
    let mut seen = BTreeSet::new();
    let mut files = Vec::new();
    let mut push = |path: &Path, kind: InputFileKind| {
        if seen.insert(path.to_path_buf()) {
            files.push(InputFile::new(path.to_path_buf(), kind));
        }
    };

    for source in target.sources() {
        push(source, InputFileKind::Source);
    }
    for resource in target.resources() {
        push(resource, InputFileKind::Resource);
    }
    for earlier in target.plugin_usages().iter().take(position) {
        let owner = NodeOwner::new(target.name(), earlier.plugin());
        for generated in graph.generated_files(&owner) {
            push(&generated, InputFileKind::Generated);
        }
    }
    files
}

fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        String::from("_")
    } else {
        cleaned
    }
}
