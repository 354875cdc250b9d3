//! Pure policy construction for confined processes.
//!
//! [`SandboxPolicy::apply`] never touches the filesystem: it checks that every
//! path handed to it is absolute and folds the grants into a
//! [`SandboxProfile`]. Existence checks and canonicalisation happen later,
//! inside the [`IsolationPrimitive`](crate::IsolationPrimitive) that launches
//! the process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::SandboxError;
use crate::profile::SandboxProfile;

/// Operating systems for which an isolation primitive exists.
pub const SUPPORTED_PLATFORMS: &[&str] = &["linux", "macos"];

/// Unconfined description of a process to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    program: PathBuf,
    args: Vec<String>,
    environment: BTreeMap<String, String>,
    working_directory: Option<PathBuf>,
}

impl ProcessSpec {
    /// Creates a spec that runs `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            environment: BTreeMap::new(),
            working_directory: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets one environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Sets several environment variables for the child.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Sets the working directory of the child.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the program.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Environment set explicitly for the child.
    #[must_use]
    pub const fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Working directory, when one was set.
    #[must_use]
    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }
}

/// A [`ProcessSpec`] paired with the profile that confines it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxedProcessSpec {
    spec: ProcessSpec,
    profile: SandboxProfile,
}

impl SandboxedProcessSpec {
    /// The process to launch.
    #[must_use]
    pub const fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// The restrictions that apply to it.
    #[must_use]
    pub const fn profile(&self) -> &SandboxProfile {
        &self.profile
    }
}

/// Builds sandboxed process specifications for one platform.
///
/// A policy exists only for platforms with an isolation primitive. Every
/// grant it hands out is per process; host runtime roots are added by the
/// profile itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    platform: String,
}

impl SandboxPolicy {
    /// Creates the policy for the platform this binary was compiled for.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::UnsupportedPlatform`] when no isolation
    /// primitive exists for the host.
    pub fn for_current_platform() -> Result<Self, SandboxError> {
        Self::for_platform(std::env::consts::OS)
    }

    /// Creates the policy for the named platform.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::UnsupportedPlatform`] when `platform` is not one
    /// of [`SUPPORTED_PLATFORMS`].
    pub fn for_platform(platform: &str) -> Result<Self, SandboxError> {
        if !SUPPORTED_PLATFORMS.contains(&platform) {
            return Err(SandboxError::UnsupportedPlatform {
                platform: platform.to_owned(),
            });
        }
        Ok(Self {
            platform: platform.to_owned(),
        })
    }

    /// Platform the policy was checked against.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Confines `spec` so it may only write beneath `allowed_write_roots`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ProgramNotAbsolute`] or
    /// [`SandboxError::GrantNotAbsolute`] when a path is relative.
    pub fn apply(
        &self,
        spec: ProcessSpec,
        allowed_write_roots: &[PathBuf],
    ) -> Result<SandboxedProcessSpec, SandboxError> {
        self.apply_with_reads(spec, allowed_write_roots, &[])
    }

    /// Like [`Self::apply`], additionally granting read access to
    /// `read_paths`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ProgramNotAbsolute`] or
    /// [`SandboxError::GrantNotAbsolute`] when a path is relative.
    pub fn apply_with_reads(
        &self,
        spec: ProcessSpec,
        allowed_write_roots: &[PathBuf],
        read_paths: &[PathBuf],
    ) -> Result<SandboxedProcessSpec, SandboxError> {
        if !spec.program().is_absolute() {
            return Err(SandboxError::ProgramNotAbsolute(spec.program().to_path_buf()));
        }

        let mut profile = SandboxProfile::new().allow_executable(spec.program());
        for root in read_paths {
            profile = profile.allow_read_path(absolute(root)?);
        }
        for root in allowed_write_roots {
            profile = profile.allow_read_write_path(absolute(root)?);
        }
        if let Some(dir) = spec.working_directory() {
            let dir = absolute(dir)?;
            if !profile.permits_write(&dir) {
                profile = profile.allow_read_path(dir);
            }
        }

        Ok(SandboxedProcessSpec { spec, profile })
    }
}

fn absolute(path: &Path) -> Result<PathBuf, SandboxError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Err(SandboxError::GrantNotAbsolute(path.to_path_buf()))
    }
}
