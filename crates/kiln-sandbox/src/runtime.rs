//! Host facts the sandbox consults before spawning.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Loader and shared-library locations a dynamically linked plugin needs.
#[cfg(target_os = "linux")]
const RUNTIME_CANDIDATES: &[&str] = &[
    "/lib",
    "/lib64",
    "/usr/lib",
    "/usr/lib64",
    "/etc/ld.so.cache",
];

#[cfg(target_os = "macos")]
const RUNTIME_CANDIDATES: &[&str] = &["/usr/lib", "/System/Library/Frameworks"];

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const RUNTIME_CANDIDATES: &[&str] = &[];

/// Canonical runtime roots present on this host, readable by every sandboxed
/// process.
#[must_use]
pub fn runtime_roots() -> Vec<PathBuf> {
    existing_roots(RUNTIME_CANDIDATES.iter().map(Path::new))
}

/// Canonicalises the candidates that exist, dropping duplicates that resolve
/// to the same place (such as `/lib` linking to `/usr/lib`).
pub(crate) fn existing_roots<'a>(candidates: impl Iterator<Item = &'a Path>) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for resolved in candidates.filter_map(|candidate| fs::canonicalize(candidate).ok()) {
        if !roots.contains(&resolved) {
            roots.push(resolved);
        }
    }
    roots
}

/// Number of threads in the current process.
///
/// # Errors
///
/// Returns an error when the count cannot be read from `/proc`.
#[cfg(target_os = "linux")]
pub fn thread_count() -> io::Result<usize> {
    parse_thread_count(&fs::read_to_string("/proc/self/status")?)
}

/// Number of threads in the current process.
///
/// Hosts without `/proc` report a single thread; `birdcage` performs its own
/// check there.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(target_os = "linux"))]
pub fn thread_count() -> io::Result<usize> {
    Ok(1)
}

/// Extracts the `Threads:` field of a `/proc/<pid>/status` document.
pub(crate) fn parse_thread_count(status: &str) -> io::Result<usize> {
    let invalid = |message: &str| io::Error::new(io::ErrorKind::InvalidData, message.to_owned());
    let value = status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .ok_or_else(|| invalid("status has no Threads field"))?;
    value
        .trim()
        .parse::<usize>()
        .map_err(|error| invalid(&format!("malformed thread count: {error}")))
}
