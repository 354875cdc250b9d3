//! Shared configuration for the Kiln plugin engine.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then a
//! configuration file, then `KILN_*` environment variables, then command-line
//! flags. Optional fields fall back to the constants in [`defaults`] through
//! the accessor methods on [`Config`], so callers never observe an unset
//! value.

pub mod defaults;
pub mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_BUILD_DIR, DEFAULT_LOG_FILTER, DEFAULT_MAX_PARALLEL_INVOCATIONS,
    DEFAULT_PLUGIN_TIMEOUT_SECS, default_build_dir, default_log_filter, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Name of the file, inside the build directory, holding planner state.
pub const PLAN_STATE_FILE: &str = "plan-state.json";

/// Name of the file, inside the build directory, holding executor state.
pub const BUILD_STATE_FILE: &str = "build-state.json";

/// Resolved configuration for a planning run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "KILN")]
pub struct Config {
    /// Tracing filter expression such as `info` or `kiln_plugins=debug`.
    pub log_filter: Option<String>,
    /// Log output format.
    pub log_format: Option<LogFormat>,
    /// Directory holding work directories, built products and state files.
    pub build_dir: Option<Utf8PathBuf>,
    /// Wall-clock budget for one plugin invocation, in seconds.
    #[ortho_config(default = 60)]
    pub plugin_timeout_secs: u64,
    /// Upper bound on concurrently running plugin invocations.
    #[ortho_config(default = 1)]
    pub max_parallel_invocations: usize,
    /// Re-invoke every plugin even when a cached output is still valid.
    #[ortho_config(default = false)]
    pub always_invoke_plugins: bool,
    /// Path to the package snapshot describing targets and plugins.
    pub snapshot: Option<Utf8PathBuf>,
    /// Execute the spliced build graph after planning.
    #[ortho_config(default = false)]
    pub execute: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: None,
            log_format: None,
            build_dir: None,
            plugin_timeout_secs: DEFAULT_PLUGIN_TIMEOUT_SECS,
            max_parallel_invocations: DEFAULT_MAX_PARALLEL_INVOCATIONS,
            always_invoke_plugins: false,
            snapshot: None,
            execute: false,
        }
    }
}

/// Errors raised when a loaded configuration is internally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The plugin timeout was zero.
    #[error("plugin_timeout_secs must be greater than zero")]
    ZeroTimeout,
    /// The parallelism bound was zero.
    #[error("max_parallel_invocations must be at least 1")]
    ZeroParallelism,
    /// No package snapshot was configured.
    #[error("no package snapshot configured; pass --snapshot or set KILN_SNAPSHOT")]
    MissingSnapshot,
}

impl Config {
    /// Returns the configured log filter or the default.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Returns the configured log format or the default.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }

    /// Returns the build directory.
    #[must_use]
    pub fn build_dir(&self) -> PathBuf {
        self.build_dir
            .clone()
            .unwrap_or_else(default_build_dir)
            .into_std_path_buf()
    }

    /// Returns the root under which per-(target, plugin) work directories live.
    #[must_use]
    pub fn plugin_work_root(&self) -> PathBuf {
        self.build_dir().join("plugins")
    }

    /// Returns the built-products directory.
    #[must_use]
    pub fn built_products_dir(&self) -> PathBuf {
        self.build_dir().join("products")
    }

    /// Returns the planner state file location.
    #[must_use]
    pub fn plan_state_path(&self) -> PathBuf {
        self.build_dir().join(PLAN_STATE_FILE)
    }

    /// Returns the executor state file location.
    #[must_use]
    pub fn build_state_path(&self) -> PathBuf {
        self.build_dir().join(BUILD_STATE_FILE)
    }

    /// Returns the plugin invocation budget.
    #[must_use]
    pub const fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_timeout_secs)
    }

    /// Returns the snapshot path, when configured.
    #[must_use]
    pub fn snapshot(&self) -> Option<&Path> {
        self.snapshot.as_deref().map(camino::Utf8Path::as_std_path)
    }

    /// Rejects configurations that cannot drive a planning pass.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the timeout or parallelism bound is zero.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_parallel_invocations == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        Ok(())
    }
}
