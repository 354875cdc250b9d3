//! Planning passes: every target's plugin chain, spliced into one graph.
//!
//! Each target's plugin usages form a strictly sequential chain. For every
//! usage the planner resolves the plugin's tools, builds its context from the
//! chain's private graph fragment, reuses a cached output or invokes the
//! plugin, splices the commands and runs the prebuild commands. A plugin is
//! invoked at most once per pair and pass: files discovered by its prebuild
//! commands flow to the later usages of the chain and to the target's
//! compilation inputs, whose cache keys cover them. A failure stops only its
//! own chain. Fragments are merged into the final graph in
//! target declaration order, so the result does not depend on how chains
//! were scheduled.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use kiln_graph::{BuildGraph, CommandRunner, NodeOwner};
use tracing::{debug, error, info, warn};

use crate::cache::{CachedInvocation, PairState, PlanState, invocation_key};
use crate::context::{ContextBuilder, ToolResolver};
use crate::declaration::PluginDeclaration;
use crate::error::PlanningError;
use crate::host::PluginHost;
use crate::package::{PackageGraph, PluginUsage, Target};
use crate::prebuild::{PrebuildOutcome, run_prebuilds};
use crate::process::PluginExecutor;
use crate::protocol::{
    Diagnostic, DiagnosticSeverity, InvocationOutput, TargetBuildContext, ToolResolution,
};
use crate::registry::PluginRegistry;
use crate::splicer::splice;

/// Tracing target for planner operations.
const PLANNER_TARGET: &str = "kiln_plugins::planner";

/// Tunables of a planning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerSettings {
    /// Upper bound on chains planned at once.
    pub max_parallel_invocations: usize,
    /// Ignore cached outputs and invoke every plugin.
    pub always_invoke_plugins: bool,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_parallel_invocations: 1,
            always_invoke_plugins: false,
        }
    }
}

/// What happened to one (target, plugin) pair that planned successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRecord {
    plugin: String,
    diagnostics: Vec<Diagnostic>,
    stderr: String,
    cached: bool,
    outputs_changed: bool,
}

impl InvocationRecord {
    /// Plugin name.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Warnings and remarks from the last invocation.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Stderr of the last invocation; empty when the output was cached.
    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Whether the output was reused from an earlier pass.
    #[must_use]
    pub const fn cached(&self) -> bool {
        self.cached
    }

    /// Whether the pair's prebuild commands changed their discovered file
    /// set, so downstream consumers were derived from the new set.
    #[must_use]
    pub const fn prebuild_outputs_changed(&self) -> bool {
        self.outputs_changed
    }
}

/// Result of one target's chain.
#[derive(Debug, Clone)]
pub struct ChainReport {
    target: String,
    invocations: Vec<InvocationRecord>,
    failure: Option<PlanningError>,
    skipped: Vec<String>,
}

impl ChainReport {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_owned(),
            invocations: Vec::new(),
            failure: None,
            skipped: Vec::new(),
        }
    }

    /// Target name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Pairs that planned successfully, in usage order.
    #[must_use]
    pub fn invocations(&self) -> &[InvocationRecord] {
        &self.invocations
    }

    /// The failure that stopped the chain.
    #[must_use]
    pub const fn failure(&self) -> Option<&PlanningError> {
        self.failure.as_ref()
    }

    /// Plugins not attempted because an earlier one failed.
    #[must_use]
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }
}

/// Outcome of a planning pass.
#[derive(Debug, Clone)]
pub struct PlanReport {
    graph: BuildGraph,
    chains: Vec<ChainReport>,
}

impl PlanReport {
    /// The merged build graph.
    #[must_use]
    pub const fn graph(&self) -> &BuildGraph {
        &self.graph
    }

    /// Consumes the report, returning the graph.
    #[must_use]
    pub fn into_graph(self) -> BuildGraph {
        self.graph
    }

    /// Per-target results in declaration order.
    #[must_use]
    pub fn chains(&self) -> &[ChainReport] {
        &self.chains
    }

    /// Returns `true` when no chain failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.chains.iter().all(|chain| chain.failure.is_none())
    }

    /// Failures with the target whose chain they stopped.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &PlanningError)> {
        self.chains
            .iter()
            .filter_map(|chain| chain.failure().map(|failure| (chain.target(), failure)))
    }

    /// Every diagnostic of the pass with its target and plugin, including
    /// those carried by failed invocations.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<(&str, &str, &Diagnostic)> {
        let mut all = Vec::new();
        for chain in &self.chains {
            for record in &chain.invocations {
                all.extend(
                    record
                        .diagnostics
                        .iter()
                        .map(|diagnostic| (chain.target(), record.plugin(), diagnostic)),
                );
            }
            if let Some(PlanningError::Invocation(failure)) = &chain.failure {
                all.extend(
                    failure
                        .diagnostics()
                        .iter()
                        .map(|diagnostic| (chain.target(), failure.plugin(), diagnostic)),
                );
            }
        }
        all
    }
}

/// Everything one chain produced.
struct ChainOutcome {
    report: ChainReport,
    fragment: BuildGraph,
    updates: Vec<PairState>,
}

/// Inputs shared by every chain of a pass.
#[derive(Clone, Copy)]
struct PassInputs<'a> {
    package: &'a dyn PackageGraph,
    registry: &'a PluginRegistry,
    tools: &'a dyn ToolResolver,
    state: &'a PlanState,
}

/// Drives plugin chains and assembles the build graph.
#[derive(Debug)]
pub struct BuildPlanner<E, R> {
    host: PluginHost<E>,
    contexts: ContextBuilder,
    runner: R,
    settings: PlannerSettings,
}

impl<E: PluginExecutor, R: CommandRunner> BuildPlanner<E, R> {
    /// Creates a planner with default settings.
    #[must_use]
    pub fn new(host: PluginHost<E>, contexts: ContextBuilder, runner: R) -> Self {
        Self {
            host,
            contexts,
            runner,
            settings: PlannerSettings::default(),
        }
    }

    /// Replaces the settings.
    #[must_use]
    pub const fn with_settings(mut self, settings: PlannerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The plugin host.
    #[must_use]
    pub const fn host(&self) -> &PluginHost<E> {
        &self.host
    }

    /// The runner used for prebuild commands.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> PlannerSettings {
        self.settings
    }

    /// Plans every target of `package`, updating `state` for the next pass.
    ///
    /// Failures are reported per chain in the returned [`PlanReport`]; the
    /// graph holds everything that planned successfully.
    #[must_use]
    pub fn plan(
        &self,
        package: &dyn PackageGraph,
        registry: &PluginRegistry,
        tools: &dyn ToolResolver,
        state: &mut PlanState,
    ) -> PlanReport {
        let targets = package.targets();
        let outcomes = {
            let inputs = PassInputs {
                package,
                registry,
                tools,
                state,
            };
            let workers = self.worker_count(targets.len());
            if workers > 1 {
                self.plan_parallel(targets, inputs, workers)
            } else {
                targets
                    .iter()
                    .map(|target| self.plan_chain(target, inputs))
                    .collect()
            }
        };

        let mut graph = BuildGraph::new();
        let mut chains = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let ChainOutcome {
                mut report,
                fragment,
                updates,
            } = outcome;
            if let Err(source) = graph.merge(fragment) {
                error!(
                    target: PLANNER_TARGET,
                    target_name = report.target(),
                    %source,
                    "cannot merge target commands"
                );
                report.failure = Some(PlanningError::Merge {
                    target: report.target.clone(),
                    source,
                });
            }
            for update in updates {
                state.update(update);
            }
            chains.push(report);
        }

        info!(
            target: PLANNER_TARGET,
            targets = chains.len(),
            nodes = graph.node_count(),
            failed = chains.iter().filter(|chain| chain.failure.is_some()).count(),
            "planning pass complete"
        );
        PlanReport { graph, chains }
    }

    fn worker_count(&self, chains: usize) -> usize {
        let requested = self.settings.max_parallel_invocations.max(1);
        if requested > 1 && !self.host.executor().supports_parallel_invocations() {
            warn!(
                target: PLANNER_TARGET,
                requested,
                "plugin executor cannot run invocations concurrently; planning sequentially"
            );
            return 1;
        }
        requested.min(chains)
    }

    fn plan_parallel(
        &self,
        targets: &[Target],
        inputs: PassInputs<'_>,
        workers: usize,
    ) -> Vec<ChainOutcome> {
        let next = AtomicUsize::new(0);
        let (sender, receiver) = mpsc::channel();
        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let worker_sender = sender.clone();
                    let next_index = &next;
                    scope.spawn(move || {
                        loop {
                            let index = next_index.fetch_add(1, Ordering::Relaxed);
                            let Some(target) = targets.get(index) else {
                                break;
                            };
                            let outcome = self.plan_chain(target, inputs);
                            if worker_sender.send((index, outcome)).is_err() {
                                break;
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                if handle.join().is_err() {
                    error!(target: PLANNER_TARGET, "planning worker panicked");
                }
            }
        });
        drop(sender);

        let mut slots: BTreeMap<usize, ChainOutcome> = receiver.into_iter().collect();
        targets
            .iter()
            .enumerate()
            .map(|(index, target)| {
                slots.remove(&index).unwrap_or_else(|| {
                    let mut report = ChainReport::new(target.name());
                    report.failure = Some(PlanningError::WorkerLost {
                        target: target.name().to_owned(),
                    });
                    ChainOutcome {
                        report,
                        fragment: BuildGraph::new(),
                        updates: Vec::new(),
                    }
                })
            })
            .collect()
    }

    fn plan_chain(&self, target: &Target, inputs: PassInputs<'_>) -> ChainOutcome {
        let mut report = ChainReport::new(target.name());
        let mut fragment = BuildGraph::new();
        let mut updates = Vec::new();
        let usages = target.plugin_usages();

        for (position, usage) in usages.iter().enumerate() {
            match self.plan_pair(target, position, usage, inputs, &mut fragment) {
                Ok((record, update)) => {
                    report.invocations.push(record);
                    updates.push(update);
                }
                Err(failure) => {
                    error!(
                        target: PLANNER_TARGET,
                        target_name = target.name(),
                        plugin = usage.plugin(),
                        %failure,
                        "plugin chain stopped"
                    );
                    fragment.remove_pair(&NodeOwner::new(target.name(), usage.plugin()));
                    report.failure = Some(failure);
                    report.skipped = usages
                        .iter()
                        .skip(position + 1)
                        .map(|later| later.plugin().to_owned())
                        .collect();
                    break;
                }
            }
        }

        ChainOutcome {
            report,
            fragment,
            updates,
        }
    }

    fn plan_pair(
        &self,
        target: &Target,
        position: usize,
        usage: &PluginUsage,
        inputs: PassInputs<'_>,
        fragment: &mut BuildGraph,
    ) -> Result<(InvocationRecord, PairState), PlanningError> {
        let owner = NodeOwner::new(target.name(), usage.plugin());
        let plugin = inputs
            .registry
            .get(usage.plugin())
            .ok_or_else(|| PlanningError::UnknownPlugin {
                plugin: usage.plugin().to_owned(),
                target: target.name().to_owned(),
            })?;
        let resolution = resolve_tools(plugin, target, inputs.tools)?;
        let context = self.context(target, position, plugin, inputs.package, fragment)?;

        let key = if self.settings.always_invoke_plugins {
            None
        } else {
            invocation_key(plugin, &context, &resolution)
        };
        let cached = key
            .as_deref()
            .and_then(|value| inputs.state.cached_output(&owner, value))
            .cloned();

        let mut record = InvocationRecord {
            plugin: plugin.name().to_owned(),
            diagnostics: Vec::new(),
            stderr: String::new(),
            cached: cached.is_some(),
            outputs_changed: false,
        };
        let output = match cached {
            Some(reused) => {
                debug!(target: PLANNER_TARGET, %owner, "reusing cached plugin output");
                reused
            }
            None => self.invoke(plugin, &context, &resolution, &mut record)?,
        };
        self.splice_output(&context, plugin, &output, fragment)?;

        let previous = inputs
            .state
            .pair(&owner)
            .map(|pair| pair.discovered().clone())
            .unwrap_or_default();
        let prebuilds = self.prebuild(&owner, plugin, fragment, &previous)?;
        record.outputs_changed = prebuilds.is_changed();
        if record.outputs_changed {
            info!(
                target: PLANNER_TARGET,
                %owner,
                "prebuild outputs changed; later usages and compilation see the new set"
            );
        }

        record.diagnostics = output.diagnostics().to_vec();
        log_diagnostics(&owner, &record.diagnostics);
        let invocation = key.map(|value| CachedInvocation::new(value, output));
        Ok((record, PairState::new(owner, invocation, prebuilds.discovered())))
    }

    fn context(
        &self,
        target: &Target,
        position: usize,
        plugin: &PluginDeclaration,
        package: &dyn PackageGraph,
        fragment: &BuildGraph,
    ) -> Result<TargetBuildContext, PlanningError> {
        self.contexts
            .build(target, position, package, fragment)
            .map_err(|source| PlanningError::Context {
                plugin: plugin.name().to_owned(),
                target: target.name().to_owned(),
                source,
            })
    }

    fn invoke(
        &self,
        plugin: &PluginDeclaration,
        context: &TargetBuildContext,
        resolution: &ToolResolution,
        record: &mut InvocationRecord,
    ) -> Result<InvocationOutput, PlanningError> {
        let success = self.host.invoke(plugin, context, resolution)?;
        let (output, stderr) = success.into_parts();
        record.stderr = stderr;
        Ok(output)
    }

    fn splice_output(
        &self,
        context: &TargetBuildContext,
        plugin: &PluginDeclaration,
        output: &InvocationOutput,
        fragment: &mut BuildGraph,
    ) -> Result<(), PlanningError> {
        splice(context, plugin.name(), output.commands(), fragment)
            .map(drop)
            .map_err(|source| PlanningError::Splice {
                plugin: plugin.name().to_owned(),
                target: context.target_name().to_owned(),
                source,
            })
    }

    fn prebuild(
        &self,
        owner: &NodeOwner,
        plugin: &PluginDeclaration,
        fragment: &mut BuildGraph,
        previous: &BTreeMap<PathBuf, Vec<PathBuf>>,
    ) -> Result<PrebuildOutcome, PlanningError> {
        run_prebuilds(owner, fragment, &self.runner, previous).map_err(|source| {
            PlanningError::Prebuild {
                plugin: plugin.name().to_owned(),
                target: owner.target().to_owned(),
                source,
            }
        })
    }
}

fn resolve_tools(
    plugin: &PluginDeclaration,
    target: &Target,
    tools: &dyn ToolResolver,
) -> Result<ToolResolution, PlanningError> {
    let mut resolution = ToolResolution::new();
    for tool in plugin.tools() {
        let path = tools
            .resolve(tool, target.name())
            .ok_or_else(|| PlanningError::MissingTool {
                tool: tool.clone(),
                plugin: plugin.name().to_owned(),
                target: target.name().to_owned(),
            })?;
        resolution.insert(tool.clone(), path);
    }
    Ok(resolution)
}

fn log_diagnostics(owner: &NodeOwner, diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        match diagnostic.severity() {
            DiagnosticSeverity::Error => {
                error!(target: PLANNER_TARGET, %owner, %diagnostic, "plugin diagnostic");
            }
            DiagnosticSeverity::Warning => {
                warn!(target: PLANNER_TARGET, %owner, %diagnostic, "plugin diagnostic");
            }
            DiagnosticSeverity::Remark => {
                info!(target: PLANNER_TARGET, %owner, %diagnostic, "plugin diagnostic");
            }
        }
    }
}
