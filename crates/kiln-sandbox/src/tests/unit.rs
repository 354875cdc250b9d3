//! Unit tests for policy construction and profiles.

use std::path::PathBuf;

use rstest::{fixture, rstest};

use crate::error::SandboxError;
use crate::policy::{ProcessSpec, SandboxPolicy};
use crate::profile::{EnvironmentPolicy, SandboxProfile};
use crate::runtime::{existing_roots, parse_thread_count};

#[fixture]
fn policy() -> SandboxPolicy {
    SandboxPolicy::for_platform("linux").expect("linux has an isolation primitive")
}

#[rstest]
#[case::windows("windows")]
#[case::freebsd("freebsd")]
fn unsupported_platforms_fail_closed(#[case] platform: &str) {
    let err = SandboxPolicy::for_platform(platform).expect_err("policy should be refused");
    match err {
        SandboxError::UnsupportedPlatform { platform: reported } => {
            assert_eq!(reported, platform);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[rstest]
#[case::linux("linux")]
#[case::macos("macos")]
fn supported_platforms_build_a_policy(#[case] platform: &str) {
    let policy = SandboxPolicy::for_platform(platform).expect("supported platform");
    assert_eq!(policy.platform(), platform);
}

#[rstest]
fn apply_grants_only_the_requested_write_roots(policy: SandboxPolicy) {
    let spec = ProcessSpec::new("/opt/plugins/codegen");
    let sandboxed = policy
        .apply(spec, &[PathBuf::from("/build/plugins/app/codegen")])
        .expect("policy applies");

    let profile = sandboxed.profile();
    assert_eq!(
        profile.read_write_paths(),
        &[PathBuf::from("/build/plugins/app/codegen")]
    );
    assert!(
        profile
            .executable_paths()
            .contains(&PathBuf::from("/opt/plugins/codegen"))
    );
    assert!(profile.permits_write(&PathBuf::from("/build/plugins/app/codegen/out/a.rs")));
    assert!(!profile.permits_write(&PathBuf::from("/build/products/a.o")));
}

#[rstest]
fn apply_rejects_relative_programs(policy: SandboxPolicy) {
    let err = policy
        .apply(ProcessSpec::new("bin/codegen"), &[])
        .expect_err("relative program should be refused");
    assert!(matches!(
        err,
        SandboxError::ProgramNotAbsolute(path) if path == PathBuf::from("bin/codegen")
    ));
}

#[rstest]
fn apply_rejects_relative_write_roots(policy: SandboxPolicy) {
    let err = policy
        .apply(ProcessSpec::new("/opt/codegen"), &[PathBuf::from("work")])
        .expect_err("relative root should be refused");
    assert!(matches!(err, SandboxError::GrantNotAbsolute(_)));
}

#[rstest]
fn read_grants_and_working_directory_are_readable(policy: SandboxPolicy) {
    let sandboxed = policy
        .apply_with_reads(
            ProcessSpec::new("/opt/codegen").current_dir("/srv/package/Sources"),
            &[],
            &[PathBuf::from("/srv/inputs/schema.json")],
        )
        .expect("policy applies");

    let profile = sandboxed.profile();
    for expected in ["/srv/inputs/schema.json", "/srv/package/Sources"] {
        assert!(
            profile.read_only_paths().contains(&PathBuf::from(expected)),
            "missing read grant for {expected}"
        );
    }
    assert!(!profile.read_only_paths().contains(&PathBuf::from("/srv/package")));
    assert_eq!(profile.executable_paths(), [PathBuf::from("/opt/codegen")]);
}

#[rstest]
fn relative_read_grants_are_refused(policy: SandboxPolicy) {
    let err = policy
        .apply_with_reads(ProcessSpec::new("/opt/codegen"), &[], &[PathBuf::from("inputs")])
        .expect_err("relative read grant should be refused");
    assert!(matches!(err, SandboxError::GrantNotAbsolute(path) if path == PathBuf::from("inputs")));
}

#[test]
fn process_spec_records_environment_and_arguments() {
    let spec = ProcessSpec::new("/opt/codegen")
        .arg("--input")
        .args(["a.proto", "b.proto"])
        .env("LANG", "C")
        .envs([("TZ", "UTC")]);
    assert_eq!(spec.arguments(), &["--input", "a.proto", "b.proto"]);
    assert_eq!(spec.environment().get("LANG").map(String::as_str), Some("C"));
    assert_eq!(spec.environment().len(), 2);
}

#[test]
fn environment_allowlist_deduplicates_entries() {
    let profile = SandboxProfile::new()
        .allow_environment_variable("KEEP_ME")
        .allow_environment_variable("KEEP_ME");

    match profile.environment_policy() {
        EnvironmentPolicy::AllowList(keys) => {
            assert_eq!(keys.len(), 1);
            assert!(keys.contains("KEEP_ME"));
        }
        other => panic!("unexpected environment policy: {other:?}"),
    }
}

#[test]
fn profile_reads_host_runtime_roots() {
    let profile = SandboxProfile::new();
    if cfg!(any(target_os = "linux", target_os = "macos")) {
        assert!(
            !profile.read_only_paths().is_empty(),
            "runtime roots should be readable by default"
        );
    } else {
        assert!(profile.read_only_paths().is_empty());
    }
}

#[test]
fn runtime_roots_skip_missing_and_duplicate_candidates() {
    let dir = tempfile::tempdir().expect("temp dir");
    let lib = dir.path().join("lib");
    std::fs::create_dir(&lib).expect("create lib");
    std::os::unix::fs::symlink(&lib, dir.path().join("lib64")).expect("symlink lib64");

    let candidates = [lib.clone(), dir.path().join("lib64"), dir.path().join("absent")];
    let roots = existing_roots(candidates.iter().map(PathBuf::as_path));

    assert_eq!(roots, vec![lib.canonicalize().expect("canonical lib")]);
}

#[rstest]
#[case::typical("Name:\tkiln-plan\nThreads:\t1\nVmRSS:\t100 kB\n", 1)]
#[case::busy("Threads:   12\n", 12)]
fn thread_count_is_read_from_status(#[case] status: &str, #[case] expected: usize) {
    assert_eq!(parse_thread_count(status).expect("thread count"), expected);
}

#[rstest]
#[case::missing("Name:\tkiln-plan\n")]
#[case::malformed("Threads:\tmany\n")]
fn unreadable_thread_count_is_invalid_data(#[case] status: &str) {
    let err = parse_thread_count(status).expect_err("status should be rejected");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}
