//! Tests for the process state applied around a spawn.

use std::collections::BTreeMap;
use std::env;
use std::sync::{Mutex, MutexGuard, OnceLock};

use tempfile::TempDir;

use crate::env_guard::{EnvGuard, LaunchScope};
use crate::error::SandboxError;

static PROCESS_STATE: OnceLock<Mutex<()>> = OnceLock::new();

fn lock_process_state() -> MutexGuard<'static, ()> {
    PROCESS_STATE
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("process state mutex poisoned")
}

#[test]
fn reinstate_restores_changed_and_removed_variables() {
    const CHANGED: &str = "KILN_ENV_GUARD_CHANGED";
    const REMOVED: &str = "KILN_ENV_GUARD_REMOVED";
    const ADDED: &str = "KILN_ENV_GUARD_ADDED";
    let _lock = lock_process_state();
    unsafe { env::set_var(CHANGED, "original") };
    unsafe { env::set_var(REMOVED, "keep") };

    let snapshot = EnvGuard::capture();
    unsafe { env::set_var(CHANGED, "changed") };
    unsafe { env::remove_var(REMOVED) };
    unsafe { env::set_var(ADDED, "temporary") };
    snapshot.reinstate();

    assert_eq!(env::var(CHANGED).as_deref(), Ok("original"));
    assert_eq!(env::var(REMOVED).as_deref(), Ok("keep"));
    assert!(env::var(ADDED).is_err());
    unsafe { env::remove_var(CHANGED) };
    unsafe { env::remove_var(REMOVED) };
}

#[test]
fn launch_scope_applies_variables_and_directory_until_dropped() {
    const VARIABLE: &str = "KILN_LAUNCH_SCOPE_VARIABLE";
    let _lock = lock_process_state();
    let dir = TempDir::new().expect("temp dir");
    let target = dir.path().canonicalize().expect("canonical dir");
    let before = env::current_dir().expect("current dir");
    let variables = BTreeMap::from([(VARIABLE.to_owned(), "generated".to_owned())]);

    let scope = LaunchScope::enter(&variables, Some(&target)).expect("scope");
    assert_eq!(env::var(VARIABLE).as_deref(), Ok("generated"));
    assert_eq!(env::current_dir().expect("current dir"), target);
    drop(scope);

    assert!(env::var(VARIABLE).is_err());
    assert_eq!(env::current_dir().expect("current dir"), before);
}

#[test]
fn missing_working_directory_changes_nothing() {
    const VARIABLE: &str = "KILN_LAUNCH_SCOPE_UNSET";
    let _lock = lock_process_state();
    let before = env::current_dir().expect("current dir");
    let variables = BTreeMap::from([(VARIABLE.to_owned(), "value".to_owned())]);
    let missing = std::path::Path::new("/definitely/missing/work");

    let err = LaunchScope::enter(&variables, Some(missing)).expect_err("missing dir");

    assert!(matches!(err, SandboxError::WorkingDirectory { ref path, .. } if path == missing));
    assert!(env::var(VARIABLE).is_err());
    assert_eq!(env::current_dir().expect("current dir"), before);
}
