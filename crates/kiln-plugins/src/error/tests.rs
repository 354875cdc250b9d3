//! Unit tests for plugin error types.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use rstest::rstest;

use super::*;
use crate::host::{FailureReason, InvocationFailure};

#[test]
fn missing_tool_message_names_tool_plugin_and_target() {
    let error = PlanningError::MissingTool {
        tool: "protoc".into(),
        plugin: "codegen".into(),
        target: "App".into(),
    };
    let message = error.to_string();
    for expected in ["protoc", "codegen", "App", "dependencies"] {
        assert!(
            message.contains(expected),
            "expected '{expected}' in message: {message}"
        );
    }
}

#[rstest]
#[case::context(
    PlanningError::Context {
        plugin: "codegen".into(),
        target: "App".into(),
        source: ContextError::DependencyCycle { target: "Core".into() },
    }
)]
#[case::prebuild(
    PlanningError::Prebuild {
        plugin: "codegen".into(),
        target: "App".into(),
        source: PrebuildError::Directory {
            directory: PathBuf::from("/work/out"),
            source: Arc::new(io::Error::other("denied")),
        },
    }
)]
#[case::invocation(PlanningError::from(InvocationFailure::new(
    "codegen",
    "App",
    FailureReason::Crashed,
    Vec::new(),
    "",
)))]
fn planning_errors_name_plugin_and_target(#[case] error: PlanningError) {
    let message = error.to_string();
    assert!(message.contains("codegen"), "missing plugin: {message}");
    assert!(message.contains("App"), "missing target: {message}");
}

#[test]
fn outside_roots_message_includes_role_and_path() {
    let error = SpliceError::OutsideAllowedRoots {
        owner: NodeOwner::new("App", "codegen"),
        path: PathBuf::from("/etc/passwd"),
        role: "output",
    };
    let message = error.to_string();
    assert!(message.contains("output /etc/passwd"), "{message}");
    assert!(message.contains("plugin 'codegen' on target 'App'"), "{message}");
}

#[test]
fn prebuild_command_error_keeps_run_failure_as_source() {
    let error = PrebuildError::Command {
        display_name: "generate".into(),
        source: RunFailure::ExitStatus {
            code: 3,
            stderr: String::new(),
        },
    };
    let source = std::error::Error::source(&error).expect("source");
    assert!(source.to_string().contains('3'));
}

#[test]
fn errors_are_cloneable() {
    let error = StateError::Io {
        path: PathBuf::from("/state.json"),
        source: Arc::new(io::Error::other("gone")),
    };
    let cloned = error.clone();
    assert_eq!(error.to_string(), cloned.to_string());
}
