use super::*;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kiln_plugins::process::{ProcessFailure, ProcessOutput};
use kiln_plugins::protocol::{decode_input, encode_output};
use kiln_config::LogFormat;
use kiln_plugins::{
    BuildCommand, Command, InvocationOutput, PluginDeclaration, PluginUsage, Target,
};
use kiln_sandbox::{ExitOutcome, SandboxedProcessSpec};
use rstest::{fixture, rstest};
use tempfile::TempDir;


/// Plugin executor answering every invocation with one build command that
/// writes `generated.rs` into the plugin work directory.
#[derive(Default)]
struct Generator {
    calls: AtomicUsize,
}

impl PluginExecutor for Generator {
    fn run(
        &self,
        _spec: &SandboxedProcessSpec,
        stdin: &[u8],
        _timeout: Duration,
    ) -> Result<ProcessOutput, ProcessFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let input = decode_input(stdin).expect("host writes a valid input");
        let output = input.context.work_directory().join("generated.rs");
        let command = BuildCommand::new("Generating generated.rs", "/bin/sh")
            .args(["-c".to_owned(), format!("echo generated > {}", output.display())])
            .output(output);
        let answer = InvocationOutput::new(vec![Command::BuildCommand(command)], Vec::new());
        Ok(ProcessOutput {
            stdout: encode_output(&answer).expect("encode output"),
            stderr: Vec::new(),
            exit: ExitOutcome::exited(0),
        })
    }

    fn supports_parallel_invocations(&self) -> bool {
        true
    }
}

/// Runner that writes every declared output instead of launching commands.
#[derive(Default)]
struct Touch {
    runs: AtomicUsize,
}

impl CommandRunner for Touch {
    fn run(&self, node: &BuildNode) -> Result<(), RunFailure> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let launch = |err: std::io::Error| RunFailure::Launch {
            message: err.to_string(),
        };
        for output in node.outputs() {
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent).map_err(launch)?;
            }
            fs::write(output, "generated").map_err(launch)?;
        }
        Ok(())
    }
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn build_dir(&self) -> PathBuf {
        self.path().join("build")
    }

    fn write_snapshot(&self, body: &str) -> PathBuf {
        let path = self.path().join("package.json");
        fs::write(&path, body).expect("write snapshot");
        path
    }

    fn config(&self, snapshot: &Path) -> Config {
        Config {
            build_dir: Some(
                camino::Utf8PathBuf::from_path_buf(self.build_dir()).expect("utf-8 build dir"),
            ),
            snapshot: Some(
                camino::Utf8PathBuf::from_path_buf(snapshot.to_path_buf())
                    .expect("utf-8 snapshot path"),
            ),
            ..Config::default()
        }
    }

    fn session(&self) -> Session {
        let package = self.path().join("pkg");
        fs::create_dir_all(package.join("Sources/App")).expect("create target dir");
        fs::write(package.join("Sources/App/main.rs"), "fn main() {}").expect("write source");
        let plugin = self.path().join("plugins/codegen");
        fs::create_dir_all(self.path().join("plugins")).expect("create plugin dir");
        fs::write(&plugin, "codegen").expect("write plugin");
        let snapshot = PackageSnapshot::new("shop", &package)
            .with_target(
                Target::new("App", package.join("Sources/App"))
                    .with_sources(vec![package.join("Sources/App/main.rs")])
                    .with_plugin(PluginUsage::new("codegen")),
            )
            .with_plugin(PluginDeclaration::new("codegen", plugin));
        let build = self.build_dir();
        Session {
            snapshot,
            work_root: build.join("plugins"),
            products: build.join("products"),
            plan_state: build.join("plan-state.json"),
            build_state: build.join("build-state.json"),
        }
    }
}

#[fixture]
fn workspace() -> Workspace {
    Workspace {
        dir: tempfile::tempdir().expect("temp dir"),
    }
}

fn planner(session: &Session) -> BuildPlanner<Generator, Touch> {
    let policy = SandboxPolicy::for_platform("linux").expect("linux is supported");
    BuildPlanner::new(
        PluginHost::new(Generator::default(), policy, Duration::from_secs(5)),
        ContextBuilder::new(&session.work_root, &session.products),
        Touch::default(),
    )
}

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).expect("utf-8 output")
}

#[rstest]
fn plan_summary_lists_chains_and_commands(workspace: Workspace) {
    let session = workspace.session();
    let mut stdout = Vec::new();

    let report = plan_and_report(&planner(&session), &session, &mut stdout).expect("plan");

    assert!(report.is_success());
    let summary = text(stdout);
    assert!(summary.contains("target App: codegen"), "{summary}");
    assert!(summary.contains("1 build commands planned"), "{summary}");
    assert!(session.plan_state.exists());
}

#[rstest]
fn second_plan_reuses_persisted_state(workspace: Workspace) {
    let session = workspace.session();
    let planner = planner(&session);
    plan_and_report(&planner, &session, &mut Vec::new()).expect("first plan");

    let mut stdout = Vec::new();
    plan_and_report(&planner, &session, &mut stdout).expect("second plan");

    assert!(text(stdout).contains("codegen (cached)"));
    assert_eq!(planner.host().executor().calls.load(Ordering::SeqCst), 1);
}

#[rstest]
fn execution_skips_fresh_nodes_on_rerun(workspace: Workspace) {
    let session = workspace.session();
    let planner = planner(&session);
    let report = plan_and_report(&planner, &session, &mut Vec::new()).expect("plan");

    let first = execute_graph(planner.runner(), report.graph(), &session.build_state)
        .expect("first execution");
    let second = execute_graph(planner.runner(), report.graph(), &session.build_state)
        .expect("second execution");

    assert_eq!(first.ran.len(), 1);
    assert!(second.ran.is_empty());
    assert_eq!(second.skipped.len(), 1);
    assert_eq!(planner.runner().runs.load(Ordering::SeqCst), 1);
}

#[test]
fn execution_summary_reports_failures_with_stderr() {
    let id = kiln_graph::NodeId::for_command(
        &kiln_graph::NodeOwner::new("App", "codegen"),
        0,
    );
    let report = ExecutionReport {
        failed: vec![(
            id,
            RunFailure::ExitStatus {
                code: 3,
                stderr: "boom\n".to_owned(),
            },
        )],
        ..ExecutionReport::default()
    };
    let mut stdout = Vec::new();

    write_execution(&report, &mut stdout).expect("write summary");

    let summary = text(stdout);
    assert!(summary.contains("failed: command exited with status 3"), "{summary}");
    assert!(summary.contains("boom"), "{summary}");
    assert!(summary.contains("0 commands ran, 0 up to date"), "{summary}");
}

#[test]
fn missing_snapshot_is_a_configuration_error() {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let exit = run(["kiln-plan"], &mut stdout, &mut stderr);

    assert_eq!(exit, ExitCode::from(2));
    assert!(text(stderr).contains("no package snapshot configured"));
}

#[rstest]
fn zero_timeout_is_rejected(workspace: Workspace) {
    let snapshot =
        workspace.write_snapshot(r#"{"package_name": "shop", "package_directory": "."}"#);
    let config = Config {
        plugin_timeout_secs: 0,
        ..workspace.config(&snapshot)
    };

    let err = run_with_config(&config, &mut Vec::new()).expect_err("zero timeout");

    assert!(matches!(err, CliError::InvalidConfiguration(ConfigError::ZeroTimeout)));
    assert_eq!(err.exit_code(), 2);
}

#[rstest]
fn unreadable_snapshot_fails_the_run(workspace: Workspace) {
    let config = workspace.config(&workspace.path().join("absent.json"));

    let err = run_with_config(&config, &mut Vec::new()).expect_err("missing snapshot file");

    assert!(matches!(err, CliError::Snapshot(_)));
    assert_eq!(err.exit_code(), 1);
}

#[rstest]
fn targets_without_plugins_plan_successfully(workspace: Workspace) {
    let snapshot = workspace.write_snapshot(
        r#"{
            "package_name": "shop",
            "package_directory": ".",
            "targets": [{"name": "App", "directory": "Sources/App"}]
        }"#,
    );
    let mut stdout = Vec::new();

    let succeeded = run_with_config(&workspace.config(&snapshot), &mut stdout).expect("run");

    assert!(succeeded);
    let summary = text(stdout);
    assert!(summary.contains("target App: no plugins"), "{summary}");
    assert!(summary.contains("0 build commands planned"), "{summary}");
    assert!(workspace.build_dir().join("plan-state.json").exists());
}

#[rstest]
fn unknown_plugin_fails_planning(workspace: Workspace) {
    let snapshot = workspace.write_snapshot(
        r#"{
            "package_name": "shop",
            "package_directory": ".",
            "targets": [
                {
                    "name": "App",
                    "directory": "Sources/App",
                    "plugin_usages": [{"plugin": "missing"}]
                }
            ]
        }"#,
    );
    let mut stdout = Vec::new();

    let succeeded = run_with_config(&workspace.config(&snapshot), &mut stdout).expect("run");

    assert!(!succeeded);
    assert!(text(stdout).contains("error: target App"));
}

#[rstest]
#[case::json(LogFormat::Json)]
#[case::compact(LogFormat::Compact)]
fn subscriber_builds_for_each_format(#[case] format: LogFormat) {
    let config = Config {
        log_filter: Some("kiln_plugins=debug,info".to_owned()),
        log_format: Some(format),
        ..Config::default()
    };
    assert!(telemetry::subscriber(&config).is_ok());
}

#[test]
fn subscriber_rejects_invalid_filter() {
    let config = Config {
        log_filter: Some("kiln_plugins=loud".to_owned()),
        ..Config::default()
    };
    let Err(err) = telemetry::subscriber(&config) else {
        panic!("filter should be rejected");
    };
    assert!(matches!(
        err,
        TelemetryError::Filter { ref filter, .. } if filter == "kiln_plugins=loud"
    ));
}
