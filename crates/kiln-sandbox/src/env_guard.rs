//! Parent-process state around a `birdcage` spawn.
//!
//! `birdcage` reads the variables and working directory a child starts with
//! from the calling process, and its activation clears the caller's
//! environment. [`LaunchScope`] applies a spec's variables and directory to
//! the planner for the length of one spawn; [`EnvGuard`] puts the planner's
//! own environment back afterwards.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::SandboxError;

const ENV_TARGET: &str = "kiln_sandbox::env_guard";

/// Snapshot of the process environment, reinstated on drop.
#[derive(Debug)]
pub(crate) struct EnvGuard {
    saved: BTreeMap<OsString, OsString>,
}

impl EnvGuard {
    /// Records the current environment.
    pub(crate) fn capture() -> Self {
        Self {
            saved: env::vars_os().collect(),
        }
    }

    /// Removes variables added since capture and resets those that changed
    /// or vanished.
    pub(crate) fn reinstate(&self) {
        let current: BTreeMap<OsString, OsString> = env::vars_os().collect();
        // Spawning happens on a single thread, so nothing observes the
        // environment while it is rewritten.
        for key in current.keys().filter(|key| !self.saved.contains_key(*key)) {
            unsafe { env::remove_var(key) };
        }
        for (key, value) in &self.saved {
            if current.get(key) != Some(value) {
                unsafe { env::set_var(key, value) };
            }
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        self.reinstate();
    }
}

/// Variables and working directory a child inherits from the planner.
///
/// Dropping the scope restores the working directory, then the environment.
#[derive(Debug)]
pub(crate) struct LaunchScope {
    previous_dir: Option<PathBuf>,
    _environment: EnvGuard,
}

impl LaunchScope {
    /// Sets `variables` and switches to `working_directory` in the calling
    /// process.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::WorkingDirectory`] when the current directory
    /// cannot be read or `working_directory` cannot be entered. Nothing is
    /// left changed in that case.
    pub(crate) fn enter(
        variables: &BTreeMap<String, String>,
        working_directory: Option<&Path>,
    ) -> Result<Self, SandboxError> {
        let previous_dir = match working_directory {
            Some(dir) => {
                let previous = env::current_dir()
                    .and_then(|previous| env::set_current_dir(dir).map(|()| previous))
                    .map_err(|source| SandboxError::WorkingDirectory {
                        path: dir.to_path_buf(),
                        source,
                    })?;
                Some(previous)
            }
            None => None,
        };
        let environment = EnvGuard::capture();
        for (key, value) in variables {
            unsafe { env::set_var(key, value) };
        }
        Ok(Self {
            previous_dir,
            _environment: environment,
        })
    }
}

impl Drop for LaunchScope {
    fn drop(&mut self) {
        let Some(dir) = &self.previous_dir else {
            return;
        };
        if let Err(error) = env::set_current_dir(dir) {
            warn!(
                target: ENV_TARGET,
                directory = %dir.display(),
                %error,
                "cannot restore the working directory"
            );
        }
    }
}
