//! Default values applied when a configuration layer leaves a field unset.

use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Directory, relative to the working directory, holding build state.
pub const DEFAULT_BUILD_DIR: &str = ".kiln";

/// Wall-clock budget granted to a single plugin invocation.
pub const DEFAULT_PLUGIN_TIMEOUT_SECS: u64 = 60;

/// Plugin invocations run one at a time unless configured otherwise.
pub const DEFAULT_MAX_PARALLEL_INVOCATIONS: usize = 1;

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default build directory.
#[must_use]
pub fn default_build_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_BUILD_DIR)
}
