//! Unit tests for planner state persistence and invocation keys.

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::protocol::{BuildCommand, Command, InputFile, InputFileKind, TargetInfo};

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn plugin(&self) -> PluginDeclaration {
        let executable = self.path("plugin");
        if !executable.exists() {
            fs::write(&executable, "v1").expect("write plugin");
        }
        PluginDeclaration::new("codegen", executable)
    }

    fn context(&self) -> TargetBuildContext {
        let schema = self.path("schema.json");
        if !schema.exists() {
            fs::write(&schema, "{}").expect("write schema");
        }
        TargetBuildContext::new(
            TargetInfo::new("App", "App", self.dir.path()),
            self.dir.path().to_path_buf(),
            vec![
                InputFile::new(schema, InputFileKind::Resource),
                InputFile::new(self.path("not-yet.rs"), InputFileKind::Generated),
            ],
            Vec::new(),
            self.path("work"),
            self.path("products"),
        )
    }

    fn key(&self) -> String {
        invocation_key(&self.plugin(), &self.context(), &ToolResolution::new()).expect("key")
    }
}

#[fixture]
fn workspace() -> Workspace {
    Workspace {
        dir: TempDir::new().expect("temp dir"),
    }
}

fn output() -> InvocationOutput {
    InvocationOutput::new(
        vec![Command::BuildCommand(
            BuildCommand::new("Generate", "/usr/bin/gen").output("/work/gen.rs"),
        )],
        Vec::new(),
    )
}

// --- Invocation keys ---

#[rstest]
fn key_is_stable(workspace: Workspace) {
    assert_eq!(workspace.key(), workspace.key());
}

#[rstest]
fn key_tracks_input_content(workspace: Workspace) {
    let before = workspace.key();
    fs::write(workspace.path("schema.json"), "{\"v\":2}").expect("edit input");
    assert_ne!(before, workspace.key());
}

#[rstest]
fn key_tracks_appearance_of_missing_input(workspace: Workspace) {
    let before = workspace.key();
    fs::write(workspace.path("not-yet.rs"), "").expect("create input");
    assert_ne!(before, workspace.key());
}

#[rstest]
fn key_tracks_plugin_executable(workspace: Workspace) {
    let before = workspace.key();
    fs::write(workspace.path("plugin"), "v2").expect("rebuild plugin");
    assert_ne!(before, workspace.key());
}

#[rstest]
fn key_tracks_plugin_arguments(workspace: Workspace) {
    let with_args = invocation_key(
        &workspace.plugin().with_args(vec!["--fast".into()]),
        &workspace.context(),
        &ToolResolution::new(),
    );
    assert_ne!(Some(workspace.key()), with_args);
}

#[rstest]
fn key_tracks_tool_resolution(workspace: Workspace) {
    let mut tools = ToolResolution::new();
    tools.insert("protoc", "/usr/bin/protoc");
    let with_tools = invocation_key(&workspace.plugin(), &workspace.context(), &tools);
    assert_ne!(Some(workspace.key()), with_tools);
}

#[rstest]
fn missing_executable_yields_no_key(workspace: Workspace) {
    let plugin = PluginDeclaration::new("codegen", workspace.path("absent"));
    assert_eq!(
        invocation_key(&plugin, &workspace.context(), &ToolResolution::new()),
        None
    );
}

// --- Plan state ---

#[test]
fn cached_output_requires_matching_key() {
    let owner = NodeOwner::new("App", "codegen");
    let mut state = PlanState::new();
    state.update(PairState::new(
        owner.clone(),
        Some(CachedInvocation::new("k1", output())),
        BTreeMap::new(),
    ));

    assert_eq!(state.cached_output(&owner, "k1"), Some(&output()));
    assert_eq!(state.cached_output(&owner, "k2"), None);
    assert_eq!(state.cached_output(&NodeOwner::new("App", "other"), "k1"), None);
}

#[test]
fn update_replaces_existing_record() {
    let owner = NodeOwner::new("App", "codegen");
    let mut state = PlanState::new();
    state.update(PairState::new(
        owner.clone(),
        Some(CachedInvocation::new("k1", output())),
        BTreeMap::new(),
    ));
    state.update(PairState::new(owner.clone(), None, BTreeMap::new()));

    assert_eq!(state.len(), 1);
    assert!(state.pair(&owner).and_then(PairState::invocation).is_none());
}

#[rstest]
fn state_survives_save_and_load(workspace: Workspace) {
    let owner = NodeOwner::new("App", "codegen");
    let discovered = BTreeMap::from([(
        PathBuf::from("/work/out"),
        vec![PathBuf::from("/work/out/a.rs")],
    )]);
    let mut state = PlanState::new();
    state.update(PairState::new(
        owner,
        Some(CachedInvocation::new("k1", output())),
        discovered,
    ));
    let path = workspace.path("state/nested/plan.json");

    state.save(&path).expect("save");
    let loaded = PlanState::load(&path).expect("load");

    assert_eq!(loaded, state);
}

#[rstest]
fn missing_state_file_loads_empty(workspace: Workspace) {
    let loaded = PlanState::load(&workspace.path("absent.json")).expect("load");
    assert!(loaded.is_empty());
}

#[rstest]
fn corrupt_state_file_is_a_format_error(workspace: Workspace) {
    let path = workspace.path("plan.json");
    fs::write(&path, "{ not json").expect("write");
    let err = PlanState::load(&path).expect_err("corrupt");
    assert!(matches!(err, StateError::Format { .. }));
}
