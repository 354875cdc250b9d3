//! Behavioural tests for sandbox policy construction using `rstest-bdd`.

use std::cell::RefCell;
use std::path::PathBuf;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::error::SandboxError;
use crate::policy::{ProcessSpec, SandboxPolicy, SandboxedProcessSpec};

#[derive(Default)]
struct PolicyWorld {
    policy: Option<Result<SandboxPolicy, SandboxError>>,
    spec: Option<ProcessSpec>,
    sandboxed: Option<SandboxedProcessSpec>,
}

impl PolicyWorld {
    fn policy(&self) -> &SandboxPolicy {
        self.policy
            .as_ref()
            .expect("policy not constructed")
            .as_ref()
            .expect("policy construction failed")
    }

    fn sandboxed(&self) -> &SandboxedProcessSpec {
        self.sandboxed.as_ref().expect("policy not applied")
    }
}

#[fixture]
fn world() -> RefCell<PolicyWorld> {
    RefCell::new(PolicyWorld::default())
}

#[given("a sandbox policy for {platform}")]
fn given_policy(world: &RefCell<PolicyWorld>, platform: String) {
    world.borrow_mut().policy = Some(SandboxPolicy::for_platform(platform.trim_matches('"')));
}

#[given("a plugin process at {program}")]
fn given_plugin_process(world: &RefCell<PolicyWorld>, program: String) {
    world.borrow_mut().spec = Some(ProcessSpec::new(program.trim_matches('"')));
}

#[when("the policy is applied with write root {root}")]
fn when_applied(world: &RefCell<PolicyWorld>, root: String) {
    let mut world = world.borrow_mut();
    let spec = world.spec.take().expect("process not configured");
    let sandboxed = world
        .policy()
        .apply(spec, &[PathBuf::from(root.trim_matches('"'))])
        .expect("policy applies");
    world.sandboxed = Some(sandboxed);
}

#[then("writes beneath {path} are permitted")]
fn then_write_permitted(world: &RefCell<PolicyWorld>, path: String) {
    let world = world.borrow();
    assert!(
        world
            .sandboxed()
            .profile()
            .permits_write(&PathBuf::from(path.trim_matches('"')))
    );
}

#[then("writes beneath {path} are refused")]
fn then_write_refused(world: &RefCell<PolicyWorld>, path: String) {
    let world = world.borrow();
    assert!(
        !world
            .sandboxed()
            .profile()
            .permits_write(&PathBuf::from(path.trim_matches('"')))
    );
}

#[then("the plugin executable is authorised")]
fn then_executable_authorised(world: &RefCell<PolicyWorld>) {
    let world = world.borrow();
    let sandboxed = world.sandboxed();
    assert!(
        sandboxed
            .profile()
            .executable_paths()
            .iter()
            .any(|path| path == sandboxed.spec().program())
    );
}

#[then("policy construction fails as unsupported")]
fn then_unsupported(world: &RefCell<PolicyWorld>) {
    let world = world.borrow();
    let outcome = world.policy.as_ref().expect("policy not constructed");
    assert!(matches!(
        outcome,
        Err(SandboxError::UnsupportedPlatform { .. })
    ));
}

#[scenario(path = "tests/features/sandbox_policy.feature")]
fn sandbox_policy_behaviour(world: RefCell<PolicyWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/unsupported_platform.feature")]
fn unsupported_platform_behaviour(world: RefCell<PolicyWorld>) {
    let _ = world;
}
