//! Unit and behavioural tests for the plugin runtime.


use std::io::{self, Cursor, Write};
use std::path::PathBuf;

use kiln_plugins::protocol::{DecodedOutput, decode, encode};
use kiln_plugins::{
    BuildCommand, Command, Diagnostic, InputFile, InputFileKind, TargetBuildContext, TargetInfo,
    ToolResolution,
};
use rstest::{fixture, rstest};

use crate::{BuildToolPlugin, SdkError, run};

/// Plugin generating one source file per input resource.
pub(crate) struct ResourceCompiler;

impl BuildToolPlugin for ResourceCompiler {
    type Error = String;

    fn create_build_commands(
        &self,
        context: &TargetBuildContext,
        tools: &ToolResolution,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Vec<Command>, Self::Error> {
        let compiler = tools
            .get("rescc")
            .ok_or_else(|| String::from("tool 'rescc' was not resolved"))?;
        let resources: Vec<&InputFile> = context
            .input_files()
            .iter()
            .filter(|file| file.kind() == InputFileKind::Resource)
            .collect();
        if resources.is_empty() {
            diagnostics.push(Diagnostic::warning("target has no resources"));
        }
        Ok(resources
            .into_iter()
            .map(|file| {
                let stem = file
                    .path()
                    .file_stem()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let output = context.work_directory().join(format!("{stem}.rs"));
                Command::BuildCommand(
                    BuildCommand::new(format!("Compile {stem}"), compiler)
                        .input(file.path())
                        .output(output),
                )
            })
            .collect())
    }
}

pub(crate) fn context(resources: &[&str]) -> TargetBuildContext {
    TargetBuildContext::new(
        TargetInfo::new("App", "App", "/pkg/Sources/App"),
        PathBuf::from("/pkg"),
        resources
            .iter()
            .map(|name| {
                InputFile::new(
                    PathBuf::from("/pkg/Sources/App").join(name),
                    InputFileKind::Resource,
                )
            })
            .collect(),
        Vec::new(),
        PathBuf::from("/build/work/App/rescc"),
        PathBuf::from("/build/products"),
    )
}

pub(crate) fn tools() -> ToolResolution {
    let mut tools = ToolResolution::new();
    tools.insert("rescc", "/build/products/rescc");
    tools
}

/// Runs `plugin` on `input` and decodes what it wrote.
pub(crate) fn exchange(plugin: &impl BuildToolPlugin, input: &[u8]) -> DecodedOutput {
    let mut stdout = Vec::new();
    run(plugin, &mut Cursor::new(input), &mut stdout).expect("run");
    decode(&stdout).expect("output is a valid document")
}

#[fixture]
fn input() -> Vec<u8> {
    encode(&context(&["schema.json", "icons.json"]), &tools()).expect("encode")
}

#[rstest]
fn commands_follow_input_order(input: Vec<u8>) {
    let DecodedOutput::Success(output) = exchange(&ResourceCompiler, &input) else {
        panic!("expected success");
    };
    let names: Vec<&str> = output.commands().iter().map(Command::display_name).collect();
    assert_eq!(names, ["Compile schema", "Compile icons"]);
    assert!(output.diagnostics().is_empty());
}

#[test]
fn warnings_accompany_commands() {
    let input = encode(&context(&[]), &tools()).expect("encode");
    let DecodedOutput::Success(output) = exchange(&ResourceCompiler, &input) else {
        panic!("expected success");
    };
    assert!(output.commands().is_empty());
    assert_eq!(
        output.diagnostics().first().map(Diagnostic::message),
        Some("target has no resources")
    );
}

#[test]
fn plugin_error_becomes_error_diagnostic() {
    let input = encode(&context(&["schema.json"]), &ToolResolution::new()).expect("encode");
    let DecodedOutput::Failed(output) = exchange(&ResourceCompiler, &input) else {
        panic!("expected failure");
    };
    assert!(output.commands().is_empty());
    assert_eq!(
        output.diagnostics().first().map(Diagnostic::message),
        Some("tool 'rescc' was not resolved")
    );
}

#[rstest]
#[case::empty(b"".as_slice())]
#[case::garbage(b"{ not json".as_slice())]
#[case::wrong_version(b"{\"protocol_version\": 99, \"context\": {}}".as_slice())]
fn unreadable_input_is_reported_not_raised(#[case] input: &[u8]) {
    let output = exchange(&ResourceCompiler, input);
    assert!(matches!(output, DecodedOutput::Failed(_)));
}

#[rstest]
fn unsupported_version_is_named(input: Vec<u8>) {
    let text = String::from_utf8(input).expect("utf8");
    let bumped = text.replacen("\"protocol_version\":1", "\"protocol_version\":2", 1);
    let DecodedOutput::Failed(output) = exchange(&ResourceCompiler, bumped.as_bytes()) else {
        panic!("expected failure");
    };
    let message = output.diagnostics().first().map(Diagnostic::message);
    assert!(message.is_some_and(|text| text.contains("unsupported protocol version 2")));
}

struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[rstest]
fn unwritable_stdout_is_an_error(input: Vec<u8>) {
    let err = run(&ResourceCompiler, &mut Cursor::new(input), &mut BrokenPipe)
        .expect_err("write fails");
    assert!(matches!(err, SdkError::Write { .. }));
}
