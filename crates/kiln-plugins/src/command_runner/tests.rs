//! Unit tests for sandboxed command execution.

use kiln_graph::{CommandLine, NodeId, NodeOwner};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::tests::{ShellIsolation, test_policy};

#[fixture]
fn workspace() -> TempDir {
    TempDir::new().expect("temp dir")
}

fn runner() -> SandboxedCommandRunner<ShellIsolation> {
    SandboxedCommandRunner::new(test_policy(), SandboxExecutor::new(ShellIsolation))
}

fn owner() -> NodeOwner {
    NodeOwner::new("App", "codegen")
}

fn shell(script: &str) -> CommandLine {
    CommandLine::new("/bin/sh", vec!["-c".into(), script.into()])
}

fn build(script: &str, inputs: Vec<PathBuf>, outputs: Vec<PathBuf>) -> BuildNode {
    BuildNode::build(
        NodeId::for_command(&owner(), 0),
        owner(),
        "Generate",
        shell(script),
        inputs,
        outputs,
    )
}

#[rstest]
fn build_command_writes_declared_output(workspace: TempDir) {
    let input = workspace.path().join("schema.json");
    fs::write(&input, "{}").expect("write input");
    let output = workspace.path().join("gen/nested/out.rs");
    let script = format!("cat {} > {}", input.display(), output.display());

    runner()
        .run(&build(&script, vec![input], vec![output.clone()]))
        .expect("command succeeds");

    assert_eq!(fs::read_to_string(output).expect("output"), "{}");
}

#[rstest]
fn prebuild_command_gets_its_output_directory(workspace: TempDir) {
    let directory = workspace.path().join("discovered");
    let node = BuildNode::prebuild(
        NodeId::for_command(&owner(), 0),
        owner(),
        "Discover",
        shell("touch found.rs").with_working_directory(Some(directory.clone())),
        Vec::new(),
        directory.clone(),
    );

    runner().run(&node).expect("command succeeds");

    assert!(directory.join("found.rs").is_file());
}

#[rstest]
fn nonzero_exit_carries_stderr(workspace: TempDir) {
    let output = workspace.path().join("out.rs");
    let err = runner()
        .run(&build("echo 'bad input' >&2; exit 4", Vec::new(), vec![output]))
        .expect_err("exit status");
    let RunFailure::ExitStatus { code, stderr } = &err else {
        panic!("expected ExitStatus, got {err:?}");
    };
    assert_eq!(*code, 4);
    assert_eq!(stderr.trim(), "bad input");
}

#[rstest]
fn killed_command_is_terminated(workspace: TempDir) {
    let output = workspace.path().join("out.rs");
    let err = runner()
        .run(&build("kill -9 $$", Vec::new(), vec![output]))
        .expect_err("terminated");
    assert!(matches!(err, RunFailure::Terminated { .. }));
}

#[rstest]
fn missing_executable_is_a_launch_failure(workspace: TempDir) {
    let node = BuildNode::build(
        NodeId::for_command(&owner(), 0),
        owner(),
        "Generate",
        CommandLine::new(workspace.path().join("absent"), Vec::new()),
        Vec::new(),
        vec![workspace.path().join("out.rs")],
    );
    let err = runner().run(&node).expect_err("launch failure");
    assert!(matches!(err, RunFailure::Launch { .. }));
}

#[rstest]
fn slow_command_times_out(workspace: TempDir) {
    let output = workspace.path().join("out.rs");
    let err = runner()
        .with_timeout(Duration::from_millis(200))
        .run(&build("sleep 30", Vec::new(), vec![output]))
        .expect_err("timeout");
    assert!(matches!(err, RunFailure::Launch { .. }));
}

#[test]
fn write_roots_are_output_parents() {
    let dir = TempDir::new().expect("temp dir");
    let node = build(
        "true",
        Vec::new(),
        vec![
            dir.path().join("b/one.rs"),
            dir.path().join("a/two.rs"),
            dir.path().join("b/three.rs"),
        ],
    );
    let roots = write_roots(&node).expect("roots");
    assert_eq!(roots, [dir.path().join("a"), dir.path().join("b")]);
    assert!(dir.path().join("a").is_dir());
}

#[test]
fn default_timeout_applies() {
    assert_eq!(runner().timeout(), DEFAULT_COMMAND_TIMEOUT);
}
