//! Wire protocol between the host and plugin processes.
//!
//! The exchange is one JSON document in each direction. The host writes an
//! input envelope (the [`TargetBuildContext`] and [`ToolResolution`]) to the
//! plugin's stdin and closes it; the plugin writes one output envelope (an
//! [`InvocationOutput`]) to stdout and exits. Stderr is free-form debug text
//! and never parsed.
//!
//! Both envelopes carry [`PROTOCOL_VERSION`]. Unknown fields are ignored on
//! decode in both directions so hosts and plugins built against different
//! versions keep working. Paths cross the boundary exactly as they were
//! written; normalisation is the splicer's concern.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::Utf8Error;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the envelope format written by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Whether an input file is a static source, a static resource, or was
/// generated by an earlier plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFileKind {
    /// Declared source file.
    Source,
    /// Declared resource file.
    Resource,
    /// Output of a plugin applied earlier to the same target.
    Generated,
}

/// One file the plugin may consume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputFile {
    path: PathBuf,
    kind: InputFileKind,
}

impl InputFile {
    /// Creates an input file entry.
    #[must_use]
    pub const fn new(path: PathBuf, kind: InputFileKind) -> Self {
        Self { path, kind }
    }

    /// File path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the file came from.
    #[must_use]
    pub const fn kind(&self) -> InputFileKind {
        self.kind
    }
}

/// Name, module and directory of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    name: String,
    module_name: String,
    directory: PathBuf,
}

impl TargetInfo {
    /// Creates a target description.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        module_name: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            module_name: module_name.into(),
            directory: directory.into(),
        }
    }

    /// Target name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module name.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Source directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Everything a plugin learns about the target it is applied to.
///
/// Built fresh for every invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetBuildContext {
    target: TargetInfo,
    package_directory: PathBuf,
    input_files: Vec<InputFile>,
    dependencies: Vec<TargetInfo>,
    work_directory: PathBuf,
    built_products_directory: PathBuf,
}

impl TargetBuildContext {
    /// Assembles a context from its parts.
    #[must_use]
    pub const fn new(
        target: TargetInfo,
        package_directory: PathBuf,
        input_files: Vec<InputFile>,
        dependencies: Vec<TargetInfo>,
        work_directory: PathBuf,
        built_products_directory: PathBuf,
    ) -> Self {
        Self {
            target,
            package_directory,
            input_files,
            dependencies,
            work_directory,
            built_products_directory,
        }
    }

    /// Target name.
    #[must_use]
    pub fn target_name(&self) -> &str {
        self.target.name()
    }

    /// Module name of the target.
    #[must_use]
    pub fn module_name(&self) -> &str {
        self.target.module_name()
    }

    /// Source directory of the target.
    #[must_use]
    pub fn target_directory(&self) -> &Path {
        self.target.directory()
    }

    /// Package directory.
    #[must_use]
    pub fn package_directory(&self) -> &Path {
        &self.package_directory
    }

    /// Sources, resources and earlier plugins' generated files.
    #[must_use]
    pub fn input_files(&self) -> &[InputFile] {
        &self.input_files
    }

    /// Transitive dependencies, each preceding its own dependencies.
    #[must_use]
    pub fn dependencies(&self) -> &[TargetInfo] {
        &self.dependencies
    }

    /// Work directory owned by this (target, plugin) pair.
    #[must_use]
    pub fn work_directory(&self) -> &Path {
        &self.work_directory
    }

    /// Built-products directory.
    #[must_use]
    pub fn built_products_directory(&self) -> &Path {
        &self.built_products_directory
    }
}

/// Absolute paths of the dependency tools a plugin may invoke, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolResolution {
    tools: BTreeMap<String, PathBuf>,
}

impl ToolResolution {
    /// Creates an empty resolution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the path of `tool`.
    pub fn insert(&mut self, tool: impl Into<String>, path: impl Into<PathBuf>) {
        self.tools.insert(tool.into(), path.into());
    }

    /// Path of `tool`, if resolved.
    #[must_use]
    pub fn get(&self, tool: &str) -> Option<&Path> {
        self.tools.get(tool).map(PathBuf::as_path)
    }

    /// All resolved tools in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.tools
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_path()))
    }

    /// Returns `true` when no tools are resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// A command with inputs and outputs known before it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCommand {
    display_name: String,
    executable: PathBuf,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    input_files: Vec<PathBuf>,
    #[serde(default)]
    output_files: Vec<PathBuf>,
}

impl BuildCommand {
    /// Creates a command running `executable`.
    #[must_use]
    pub fn new(display_name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            display_name: display_name.into(),
            executable: executable.into(),
            arguments: Vec::new(),
            working_directory: None,
            environment: BTreeMap::new(),
            input_files: Vec::new(),
            output_files: Vec::new(),
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Sets one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Declares an input file.
    #[must_use]
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_files.push(path.into());
        self
    }

    /// Declares an output file.
    #[must_use]
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_files.push(path.into());
        self
    }

    /// Human-readable description.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Program to run.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Program arguments.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Working directory, when declared.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Environment variables.
    #[must_use]
    pub const fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Declared inputs.
    #[must_use]
    pub fn input_files(&self) -> &[PathBuf] {
        &self.input_files
    }

    /// Declared outputs.
    #[must_use]
    pub fn output_files(&self) -> &[PathBuf] {
        &self.output_files
    }
}

/// A command run before planning completes whose outputs are discovered by
/// scanning its output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrebuildCommand {
    display_name: String,
    executable: PathBuf,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    input_files: Vec<PathBuf>,
    output_files_directory: PathBuf,
}

impl PrebuildCommand {
    /// Creates a command running `executable` that writes into
    /// `output_files_directory`.
    #[must_use]
    pub fn new(
        display_name: impl Into<String>,
        executable: impl Into<PathBuf>,
        output_files_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            executable: executable.into(),
            arguments: Vec::new(),
            working_directory: None,
            environment: BTreeMap::new(),
            input_files: Vec::new(),
            output_files_directory: output_files_directory.into(),
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Sets one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Declares an input file.
    #[must_use]
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_files.push(path.into());
        self
    }

    /// Human-readable description.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Program to run.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Program arguments.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Working directory, when declared.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Environment variables.
    #[must_use]
    pub const fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Declared inputs.
    #[must_use]
    pub fn input_files(&self) -> &[PathBuf] {
        &self.input_files
    }

    /// Directory whose contents become the command's outputs.
    #[must_use]
    pub fn output_files_directory(&self) -> &Path {
        &self.output_files_directory
    }
}

/// Work a plugin asks the build system to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Incremental command with declared inputs and outputs.
    BuildCommand(BuildCommand),
    /// Command run once per planning pass; outputs found by directory scan.
    PrebuildCommand(PrebuildCommand),
}

impl Command {
    /// Human-readable description.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Self::BuildCommand(command) => command.display_name(),
            Self::PrebuildCommand(command) => command.display_name(),
        }
    }

    /// Every path the command declares: executable, working directory,
    /// inputs, outputs and output directory.
    #[must_use]
    pub fn declared_paths(&self) -> Vec<&Path> {
        let mut paths = Vec::new();
        match self {
            Self::BuildCommand(command) => {
                paths.push(command.executable());
                paths.extend(command.working_dir());
                paths.extend(command.input_files().iter().map(PathBuf::as_path));
                paths.extend(command.output_files().iter().map(PathBuf::as_path));
            }
            Self::PrebuildCommand(command) => {
                paths.push(command.executable());
                paths.extend(command.working_dir());
                paths.extend(command.input_files().iter().map(PathBuf::as_path));
                paths.push(command.output_files_directory());
            }
        }
        paths
    }
}

impl From<BuildCommand> for Command {
    fn from(command: BuildCommand) -> Self {
        Self::BuildCommand(command)
    }
}

impl From<PrebuildCommand> for Command {
    fn from(command: PrebuildCommand) -> Self {
        Self::PrebuildCommand(command)
    }
}

/// Severity of a plugin diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    /// Fails the invocation.
    Error,
    /// Reported but not fatal.
    Warning,
    /// Informational.
    Remark,
}

impl std::fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Remark => "remark",
        })
    }
}

/// A message emitted by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
}

impl Diagnostic {
    /// Creates a diagnostic without a location.
    #[must_use]
    pub fn new(severity: DiagnosticSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    /// Creates an error diagnostic.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Error, message)
    }

    /// Creates a warning diagnostic.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Warning, message)
    }

    /// Creates a remark diagnostic.
    #[must_use]
    pub fn remark(message: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Remark, message)
    }

    /// Attaches a file and optional line.
    #[must_use]
    pub fn at(mut self, file: impl Into<PathBuf>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    /// Severity.
    #[must_use]
    pub const fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    /// Message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// File the diagnostic refers to.
    #[must_use]
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Line within [`Self::file`].
    #[must_use]
    pub const fn line(&self) -> Option<u32> {
        self.line
    }

    /// Returns `true` for error severity.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{line}: ", file.display())?,
            (Some(file), None) => write!(f, "{}: ", file.display())?,
            _ => {}
        }
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Commands and diagnostics returned by one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationOutput {
    #[serde(default)]
    commands: Vec<Command>,
    #[serde(default)]
    diagnostics: Vec<Diagnostic>,
}

impl InvocationOutput {
    /// Creates an output.
    #[must_use]
    pub const fn new(commands: Vec<Command>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            commands,
            diagnostics,
        }
    }

    /// Commands in emission order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Diagnostics in emission order.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Returns `true` when any diagnostic has error severity.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Splits the output into its parts.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Command>, Vec<Diagnostic>) {
        (self.commands, self.diagnostics)
    }
}

/// Input as seen by a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationInput {
    /// Protocol version written by the host.
    pub protocol_version: u32,
    /// Target context.
    pub context: TargetBuildContext,
    /// Resolved dependency tools.
    pub tools: ToolResolution,
}

/// A well-formed plugin output, classified by its diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedOutput {
    /// No error diagnostics.
    Success(InvocationOutput),
    /// At least one error diagnostic; the commands must not be used.
    Failed(InvocationOutput),
}

/// Output that does not follow the protocol.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Nothing but whitespace was written.
    #[error("plugin produced no output")]
    Empty,
    /// The bytes are not UTF-8.
    #[error("plugin output is not valid UTF-8: {0}")]
    NotUtf8(#[source] Utf8Error),
    /// The document is not a valid envelope.
    #[error("plugin output is malformed: {0}")]
    Malformed(#[source] Arc<serde_json::Error>),
}

#[derive(Serialize)]
struct InputEnvelopeRef<'a> {
    protocol_version: u32,
    context: &'a TargetBuildContext,
    tools: &'a ToolResolution,
}

#[derive(Deserialize)]
struct InputEnvelope {
    protocol_version: u32,
    context: TargetBuildContext,
    #[serde(default)]
    tools: ToolResolution,
}

#[derive(Serialize)]
struct OutputEnvelopeRef<'a> {
    protocol_version: u32,
    #[serde(flatten)]
    output: &'a InvocationOutput,
}

#[derive(Deserialize)]
struct OutputEnvelope {
    #[serde(rename = "protocol_version")]
    _protocol_version: u32,
    #[serde(flatten)]
    output: InvocationOutput,
}

/// Encodes the host's input document, newline terminated.
///
/// # Errors
///
/// Returns the serialisation error; this only happens for paths that are not
/// valid UTF-8.
pub fn encode(
    context: &TargetBuildContext,
    tools: &ToolResolution,
) -> Result<Vec<u8>, serde_json::Error> {
    let envelope = InputEnvelopeRef {
        protocol_version: PROTOCOL_VERSION,
        context,
        tools,
    };
    let mut bytes = serde_json::to_vec(&envelope)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decodes and classifies a plugin's output document.
///
/// # Errors
///
/// Returns [`DecodeError`] when the bytes are empty, not UTF-8, or not a
/// valid output envelope.
pub fn decode(bytes: &[u8]) -> Result<DecodedOutput, DecodeError> {
    let document = document_text(bytes)?;
    let envelope: OutputEnvelope =
        serde_json::from_str(document).map_err(|err| DecodeError::Malformed(Arc::new(err)))?;
    if envelope.output.has_errors() {
        Ok(DecodedOutput::Failed(envelope.output))
    } else {
        Ok(DecodedOutput::Success(envelope.output))
    }
}

/// Decodes the host's input document on the plugin side.
///
/// # Errors
///
/// Returns [`DecodeError`] when the bytes are empty, not UTF-8, or not a
/// valid input envelope.
pub fn decode_input(bytes: &[u8]) -> Result<InvocationInput, DecodeError> {
    let document = document_text(bytes)?;
    let envelope: InputEnvelope =
        serde_json::from_str(document).map_err(|err| DecodeError::Malformed(Arc::new(err)))?;
    Ok(InvocationInput {
        protocol_version: envelope.protocol_version,
        context: envelope.context,
        tools: envelope.tools,
    })
}

fn document_text(bytes: &[u8]) -> Result<&str, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(DecodeError::NotUtf8)?.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(text)
}

/// Encodes a plugin's output document, newline terminated.
///
/// # Errors
///
/// Returns the serialisation error; this only happens for paths that are not
/// valid UTF-8.
pub fn encode_output(output: &InvocationOutput) -> Result<Vec<u8>, serde_json::Error> {
    let envelope = OutputEnvelopeRef {
        protocol_version: PROTOCOL_VERSION,
        output,
    };
    let mut bytes = serde_json::to_vec(&envelope)?;
    bytes.push(b'\n');
    Ok(bytes)
}
