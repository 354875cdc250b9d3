//! Domain errors raised by the sandbox policy engine.

use std::io;
use std::path::PathBuf;

use birdcage::error::Error as BirdcageError;
use thiserror::Error;

/// Errors raised while constructing a sandbox or launching a confined process.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// No isolation primitive exists for the host platform.
    #[error("no process isolation primitive exists on '{platform}'; refusing to run unconfined")]
    UnsupportedPlatform {
        /// Operating system identifier reported by the host.
        platform: String,
    },

    /// The supplied program path was not absolute.
    #[error("sandboxed commands require absolute program paths, got {}", .0.display())]
    ProgramNotAbsolute(PathBuf),

    /// A filesystem grant was not an absolute path.
    #[error("sandbox grants require absolute paths, got {}", .0.display())]
    GrantNotAbsolute(PathBuf),

    /// The program was not whitelisted in the profile.
    #[error("executable {} is not authorised by the sandbox profile", program.display())]
    ExecutableNotAuthorised {
        /// Program that was refused.
        program: PathBuf,
    },

    /// The supplied path does not exist and therefore cannot be whitelisted.
    #[error("path {} does not exist on the host filesystem", path.display())]
    MissingPath {
        /// Path that was checked.
        path: PathBuf,
    },

    /// Canonicalisation of a path failed.
    #[error("failed to canonicalise {}: {source}", path.display())]
    CanonicalisationFailed {
        /// Path that was being resolved.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The current process hosts more than one thread.
    #[error("sandboxing must occur in a single-threaded context (observed {thread_count} threads)")]
    MultiThreaded {
        /// Number of threads observed.
        thread_count: usize,
    },

    /// Thread count could not be determined from `/proc`.
    #[error("failed to determine thread count: {source}")]
    ThreadCountUnavailable {
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The confined process could not be started.
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The child's working directory could not be entered.
    #[error("cannot enter working directory {}: {source}", path.display())]
    WorkingDirectory {
        /// Directory the child should start in.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The underlying sandbox library rejected activation.
    #[error("birdcage activation failed: {0}")]
    Activation(#[from] BirdcageError),
}
