//! Planning-time execution of prebuild commands.
//!
//! A prebuild command runs once per planning pass, before its outputs are
//! known. Its output directory is created if needed but never cleared, the
//! command is run, and the directory is scanned. The scanned set is recorded
//! in the build graph and compared with the set recorded by the previous
//! pass; the planner logs a change and passes the new set to the pair's
//! downstream consumers.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_graph::{BuildGraph, BuildNode, CommandRunner, NodeKind, NodeOwner};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::PrebuildError;

/// Tracing target for prebuild operations.
const PREBUILD_TARGET: &str = "kiln_plugins::prebuild";

/// Files found in one prebuild output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryScan {
    files: Vec<PathBuf>,
    added: Vec<PathBuf>,
    removed: Vec<PathBuf>,
}

impl DirectoryScan {
    fn compare(files: Vec<PathBuf>, baseline: &[PathBuf]) -> Self {
        let before: BTreeSet<&PathBuf> = baseline.iter().collect();
        let after: BTreeSet<&PathBuf> = files.iter().collect();
        let added = after.difference(&before).map(|p| (*p).clone()).collect();
        let removed = before.difference(&after).map(|p| (*p).clone()).collect();
        Self {
            files,
            added,
            removed,
        }
    }

    /// Every file in the directory, sorted.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Files absent from the baseline.
    #[must_use]
    pub fn added(&self) -> &[PathBuf] {
        &self.added
    }

    /// Baseline files no longer present.
    #[must_use]
    pub fn removed(&self) -> &[PathBuf] {
        &self.removed
    }

    /// Returns `true` when the set differs from the baseline.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Result of running every prebuild command of one pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrebuildOutcome {
    scans: BTreeMap<PathBuf, DirectoryScan>,
}

impl PrebuildOutcome {
    /// Scans keyed by output directory.
    #[must_use]
    pub const fn scans(&self) -> &BTreeMap<PathBuf, DirectoryScan> {
        &self.scans
    }

    /// Returns `true` when any directory's file set changed.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.scans.values().any(DirectoryScan::is_changed)
    }

    /// Discovered files by directory, in the shape persisted between passes.
    #[must_use]
    pub fn discovered(&self) -> BTreeMap<PathBuf, Vec<PathBuf>> {
        self.scans
            .iter()
            .map(|(dir, scan)| (dir.clone(), scan.files.clone()))
            .collect()
    }
}

/// Runs the prebuild nodes of `owner` in `graph` and records what they
/// produced.
///
/// `previous` holds the sets recorded by the last planning pass; a directory
/// without one is compared against its contents before the run.
///
/// # Errors
///
/// Returns [`PrebuildError`] when an output directory cannot be prepared or
/// scanned, or a command fails. Directories scanned before the failure stay
/// recorded.
pub fn run_prebuilds<R: CommandRunner + ?Sized>(
    owner: &NodeOwner,
    graph: &mut BuildGraph,
    runner: &R,
    previous: &BTreeMap<PathBuf, Vec<PathBuf>>,
) -> Result<PrebuildOutcome, PrebuildError> {
    let nodes: Vec<BuildNode> = graph
        .nodes_of(owner)
        .filter(|node| node.kind() == NodeKind::Prebuild)
        .cloned()
        .collect();
    let mut outcome = PrebuildOutcome::default();

    for node in &nodes {
        let Some(directory) = node.output_directory() else {
            continue;
        };
        fs::create_dir_all(directory).map_err(|err| directory_error(directory, err))?;
        let baseline = match previous.get(directory) {
            Some(files) => files.clone(),
            None => scan_directory(directory)?,
        };

        debug!(
            target: PREBUILD_TARGET,
            %owner,
            command = node.display_name(),
            "running prebuild command"
        );
        runner
            .run(node)
            .map_err(|source| PrebuildError::Command {
                display_name: node.display_name().to_owned(),
                source,
            })?;

        let files = scan_directory(directory)?;
        graph.record_discovered(owner, directory, files.clone());
        let scan = DirectoryScan::compare(files, &baseline);
        if scan.is_changed() {
            info!(
                target: PREBUILD_TARGET,
                %owner,
                directory = %directory.display(),
                added = scan.added.len(),
                removed = scan.removed.len(),
                "prebuild output set changed"
            );
        }
        outcome.scans.insert(directory.to_path_buf(), scan);
    }
    Ok(outcome)
}

/// Files beneath `directory`, recursively, sorted by path. Symbolic links
/// are listed but not followed.
///
/// # Errors
///
/// Returns [`PrebuildError::Directory`] when the directory or one of its
/// subdirectories cannot be read.
pub fn scan_directory(directory: &Path) -> Result<Vec<PathBuf>, PrebuildError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(directory).min_depth(1) {
        let item = entry.map_err(|err| directory_error(directory, io::Error::from(err)))?;
        if !item.file_type().is_dir() {
            files.push(item.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn directory_error(directory: &Path, source: io::Error) -> PrebuildError {
    PrebuildError::Directory {
        directory: directory.to_path_buf(),
        source: Arc::new(source),
    }
}
