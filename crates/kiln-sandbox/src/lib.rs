//! Sandbox Policy Engine for Kiln plugin and command processes.
//!
//! The crate splits sandboxing into two halves. [`SandboxPolicy`] is a pure
//! function from a [`ProcessSpec`] and a set of permitted write roots to a
//! [`SandboxedProcessSpec`] carrying a restrictive [`SandboxProfile`]. An
//! [`IsolationPrimitive`] then turns that specification into a running,
//! confined process. The production primitive, [`BirdcageIsolation`], wraps
//! the [`birdcage`] library (Linux namespaces and `seccomp-bpf`, or the macOS
//! sandbox).
//!
//! The policy is intentionally restrictive:
//! - Networking is never granted, for plugins or for the commands they emit.
//! - Environment variables are stripped unless the spec sets them explicitly.
//! - Writes are confined to the roots handed to [`SandboxPolicy::apply`].
//! - Standard library locations on Linux are readable by default to keep
//!   dynamically linked binaries functional.
//!
//! Policy construction fails closed: on a platform without an isolation
//! primitive [`SandboxPolicy::for_current_platform`] returns
//! [`SandboxError::UnsupportedPlatform`] and nothing is ever spawned.
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! use kiln_sandbox::{BirdcageIsolation, IsolationPrimitive, ProcessSpec, SandboxPolicy};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = SandboxPolicy::for_current_platform()?;
//! let spec = ProcessSpec::new("/usr/bin/true");
//! let sandboxed = policy.apply(spec, &[PathBuf::from("/tmp/kiln-work")])?;
//! let mut child = BirdcageIsolation.spawn(&sandboxed)?;
//! while child.try_wait()?.is_none() {}
//! # Ok(()) }
//! ```

pub(crate) mod env_guard;
mod error;
mod isolation;
mod policy;
mod profile;
mod runtime;

pub use error::SandboxError;
pub use isolation::{BirdcageIsolation, ExitOutcome, IsolatedChild, IsolationPrimitive};
pub use policy::{ProcessSpec, SandboxPolicy, SandboxedProcessSpec, SUPPORTED_PLATFORMS};
pub use profile::{EnvironmentPolicy, SandboxProfile};

#[cfg(test)]
mod tests;
