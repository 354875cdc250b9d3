//! Package model consumed by the planner.
//!
//! Manifest parsing and cross-package resolution live outside Kiln; the
//! planner only needs the resolved view exposed by [`PackageGraph`]. The
//! [`PackageSnapshot`] is a serialisable implementation that the command-line
//! front end loads from JSON.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::ToolResolver;
use crate::declaration::PluginDeclaration;
use crate::error::{ContextError, PluginError, SnapshotError};
use crate::registry::PluginRegistry;

/// A target's opt-in to a plugin. Its position in
/// [`Target::plugin_usages`] is its application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginUsage {
    plugin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    package: Option<String>,
}

impl PluginUsage {
    /// Creates a usage of `plugin` from the current package.
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            package: None,
        }
    }

    /// Records the package the plugin comes from.
    #[must_use]
    pub fn from_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Plugin name.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Package providing the plugin, when not the current one.
    #[must_use]
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }
}

/// A buildable unit of sources and resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    module_name: Option<String>,
    directory: PathBuf,
    #[serde(default)]
    sources: Vec<PathBuf>,
    #[serde(default)]
    resources: Vec<PathBuf>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    plugin_usages: Vec<PluginUsage>,
}

impl Target {
    /// Creates a target rooted at `directory`.
    #[must_use]
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            module_name: None,
            directory: directory.into(),
            sources: Vec::new(),
            resources: Vec::new(),
            dependencies: Vec::new(),
            plugin_usages: Vec::new(),
        }
    }

    /// Sets a module name distinct from the target name.
    #[must_use]
    pub fn with_module_name(mut self, module_name: impl Into<String>) -> Self {
        self.module_name = Some(module_name.into());
        self
    }

    /// Sets the static source files.
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.sources = sources;
        self
    }

    /// Sets the static resource files.
    #[must_use]
    pub fn with_resources(mut self, resources: Vec<PathBuf>) -> Self {
        self.resources = resources;
        self
    }

    /// Sets the names of directly depended-upon targets, in declaration order.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Appends a plugin usage.
    #[must_use]
    pub fn with_plugin(mut self, usage: PluginUsage) -> Self {
        self.plugin_usages.push(usage);
        self
    }

    /// Target name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module name, defaulting to the target name.
    #[must_use]
    pub fn module_name(&self) -> &str {
        self.module_name.as_deref().unwrap_or(&self.name)
    }

    /// Source directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Static source files.
    #[must_use]
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Static resource files.
    #[must_use]
    pub fn resources(&self) -> &[PathBuf] {
        &self.resources
    }

    /// Direct dependencies, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Plugin usages, in application order.
    #[must_use]
    pub fn plugin_usages(&self) -> &[PluginUsage] {
        &self.plugin_usages
    }

    fn resolve_against(&mut self, package_directory: &Path) {
        self.directory = absolutise(package_directory, &self.directory);
        let directory = self.directory.clone();
        for file in self.sources.iter_mut().chain(self.resources.iter_mut()) {
            *file = absolutise(&directory, file);
        }
    }
}

/// Resolved view of one package.
pub trait PackageGraph: Sync {
    /// Package name.
    fn package_name(&self) -> &str;

    /// Absolute package directory.
    fn package_directory(&self) -> &Path;

    /// Targets in declaration order.
    fn targets(&self) -> &[Target];

    /// Looks up a target by name.
    fn target(&self, name: &str) -> Option<&Target> {
        self.targets().iter().find(|target| target.name() == name)
    }

    /// Transitive dependencies of `target`, each preceding its own
    /// dependencies; siblings keep declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] when a dependency is unknown or the graph has a
    /// cycle.
    fn dependency_closure<'a>(&'a self, target: &Target) -> Result<Vec<&'a Target>, ContextError> {
        reverse_postorder(self, target)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first traversal that visits children last-to-first, so reversing
/// the postorder puts siblings back in declaration order.
fn reverse_postorder<'a, G: PackageGraph + ?Sized>(
    graph: &'a G,
    root: &Target,
) -> Result<Vec<&'a Target>, ContextError> {
    let mut marks = HashMap::new();
    let mut postorder = Vec::new();
    marks.insert(root.name().to_owned(), Mark::Visiting);
    visit(graph, root, &mut marks, &mut postorder)?;
    postorder.reverse();
    Ok(postorder)
}

fn visit<'a, G: PackageGraph + ?Sized>(
    graph: &'a G,
    target: &Target,
    marks: &mut HashMap<String, Mark>,
    postorder: &mut Vec<&'a Target>,
) -> Result<(), ContextError> {
    for name in target.dependencies().iter().rev() {
        match marks.get(name) {
            Some(Mark::Done) => continue,
            Some(Mark::Visiting) => {
                return Err(ContextError::DependencyCycle {
                    target: name.clone(),
                });
            }
            None => {}
        }
        let dependency = graph
            .target(name)
            .ok_or_else(|| ContextError::UnknownDependency {
                target: target.name().to_owned(),
                dependency: name.clone(),
            })?;
        marks.insert(name.clone(), Mark::Visiting);
        visit(graph, dependency, marks, postorder)?;
        marks.insert(name.clone(), Mark::Done);
        postorder.push(dependency);
    }
    Ok(())
}

/// Serialisable package description: targets, plugin declarations and the
/// dependency tools available to plugins.
///
/// Relative paths are resolved on load: the package directory against the
/// snapshot file's directory, target directories and tools against the
/// package directory, and sources and resources against their target
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSnapshot {
    package_name: String,
    package_directory: PathBuf,
    #[serde(default)]
    targets: Vec<Target>,
    #[serde(default)]
    plugins: Vec<PluginDeclaration>,
    #[serde(default)]
    tools: BTreeMap<String, PathBuf>,
}

impl PackageSnapshot {
    /// Creates an empty snapshot for the package at `package_directory`.
    #[must_use]
    pub fn new(package_name: impl Into<String>, package_directory: impl Into<PathBuf>) -> Self {
        Self {
            package_name: package_name.into(),
            package_directory: package_directory.into(),
            targets: Vec::new(),
            plugins: Vec::new(),
            tools: BTreeMap::new(),
        }
    }

    /// Appends a target.
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Appends a plugin declaration.
    #[must_use]
    pub fn with_plugin(mut self, plugin: PluginDeclaration) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Makes `tool` resolvable at `path`.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(tool.into(), path.into());
        self
    }

    /// Reads, resolves and validates the snapshot stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] when the file cannot be read or parsed, or
    /// when it fails validation.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let bytes = fs::read(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;
        let mut snapshot: Self =
            serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Format {
                path: path.to_path_buf(),
                source: Arc::new(source),
            })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        snapshot.resolve_paths(base);
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Makes every relative path absolute, starting from `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        self.package_directory = absolutise(base, &self.package_directory);
        let package_directory = self.package_directory.clone();
        for target in &mut self.targets {
            target.resolve_against(&package_directory);
        }
        for path in self.tools.values_mut() {
            *path = absolutise(&package_directory, path);
        }
    }

    /// Rejects duplicate target names and repeated plugin usages.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::DuplicateTarget`] or
    /// [`SnapshotError::RepeatedPlugin`].
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let mut names = BTreeSet::new();
        for target in &self.targets {
            if !names.insert(target.name()) {
                return Err(SnapshotError::DuplicateTarget {
                    name: target.name().to_owned(),
                });
            }
            let mut plugins = BTreeSet::new();
            for usage in target.plugin_usages() {
                if !plugins.insert(usage.plugin()) {
                    return Err(SnapshotError::RepeatedPlugin {
                        target: target.name().to_owned(),
                        plugin: usage.plugin().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Declared plugins.
    #[must_use]
    pub fn plugins(&self) -> &[PluginDeclaration] {
        &self.plugins
    }

    /// Builds a registry from the declared plugins.
    ///
    /// # Errors
    ///
    /// Returns the first [`PluginError`] raised during registration.
    pub fn registry(&self) -> Result<PluginRegistry, PluginError> {
        let mut registry = PluginRegistry::new();
        for plugin in &self.plugins {
            registry.register(plugin.clone())?;
        }
        Ok(registry)
    }
}

impl PackageGraph for PackageSnapshot {
    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn package_directory(&self) -> &Path {
        &self.package_directory
    }

    fn targets(&self) -> &[Target] {
        &self.targets
    }
}

impl ToolResolver for PackageSnapshot {
    fn resolve(&self, tool: &str, _target: &str) -> Option<PathBuf> {
        self.tools.get(tool).cloned()
    }
}

fn absolutise(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
