//! Sandbox profile describing the resources a confined process may touch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::runtime::runtime_roots;

/// Environment inheritance strategy applied to sandboxed processes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvironmentPolicy {
    /// Remove all inherited environment variables before launching the child.
    #[default]
    Isolated,
    /// Allow only the named environment variables to be inherited.
    AllowList(BTreeSet<String>),
}

/// Declarative description of the resources a sandboxed process may access.
///
/// The profile starts restrictive: nothing is writable, the inherited
/// environment is dropped, and only the host runtime library roots
/// are readable. There is no switch for networking; every profile denies
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxProfile {
    read_only_paths: Vec<PathBuf>,
    read_write_paths: Vec<PathBuf>,
    executable_paths: Vec<PathBuf>,
    environment: EnvironmentPolicy,
}

impl SandboxProfile {
    /// Creates a profile with the host runtime library paths readable.
    ///
    /// ```
    /// use kiln_sandbox::SandboxProfile;
    ///
    /// let profile = SandboxProfile::new()
    ///     .allow_executable("/usr/bin/plugin")
    ///     .allow_read_write_path("/tmp/kiln-work");
    /// assert_eq!(profile.read_write_paths().len(), 1);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            read_only_paths: runtime_roots(),
            read_write_paths: Vec::new(),
            executable_paths: Vec::new(),
            environment: EnvironmentPolicy::default(),
        }
    }

    /// Grants execute and read access to the provided path.
    #[must_use]
    pub fn allow_executable(mut self, path: impl Into<PathBuf>) -> Self {
        push_unique(&mut self.executable_paths, path.into());
        self
    }

    /// Grants read-only access to the provided path.
    #[must_use]
    pub fn allow_read_path(mut self, path: impl Into<PathBuf>) -> Self {
        push_unique(&mut self.read_only_paths, path.into());
        self
    }

    /// Grants read-write access to the provided path.
    #[must_use]
    pub fn allow_read_write_path(mut self, path: impl Into<PathBuf>) -> Self {
        push_unique(&mut self.read_write_paths, path.into());
        self
    }

    /// Whitelists an environment variable for inheritance.
    #[must_use]
    pub fn allow_environment_variable(mut self, key: impl Into<String>) -> Self {
        self.environment = self.environment.with_allowed(key.into());
        self
    }

    /// Paths the process may read.
    #[must_use]
    pub fn read_only_paths(&self) -> &[PathBuf] {
        &self.read_only_paths
    }

    /// Paths the process may read and write.
    #[must_use]
    pub fn read_write_paths(&self) -> &[PathBuf] {
        &self.read_write_paths
    }

    /// Paths the process may execute.
    #[must_use]
    pub fn executable_paths(&self) -> &[PathBuf] {
        &self.executable_paths
    }

    /// Returns the configured environment policy.
    #[must_use]
    pub const fn environment_policy(&self) -> &EnvironmentPolicy {
        &self.environment
    }

    /// Reports whether `path` lies under one of the writable roots.
    ///
    /// The comparison is lexical; callers pass already-normalised paths.
    #[must_use]
    pub fn permits_write(&self, path: &Path) -> bool {
        self.read_write_paths
            .iter()
            .any(|root| path.starts_with(root))
    }
}

impl Default for SandboxProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentPolicy {
    fn with_allowed(self, key: String) -> Self {
        match self {
            Self::Isolated => Self::AllowList(BTreeSet::from([key])),
            Self::AllowList(mut keys) => {
                keys.insert(key);
                Self::AllowList(keys)
            }
        }
    }
}

fn push_unique(paths: &mut Vec<PathBuf>, path: PathBuf) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}
