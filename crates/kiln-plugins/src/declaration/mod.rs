//! Plugin declarations: identity, capability and dependency tools.
//!
//! A [`PluginDeclaration`] records everything the host needs to know about a
//! compiled plugin: its name, capability, the dependency tools it may name in
//! the commands it emits, and the executable that implements it.
//! Declarations are validated on registration to reject obviously invalid
//! configurations early.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Category of extension a plugin provides.
///
/// # Example
///
/// ```
/// use kiln_plugins::PluginCapability;
///
/// assert_eq!(PluginCapability::BuildTool.as_str(), "build_tool");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginCapability {
    /// Emits build and prebuild commands for the targets that use it.
    #[default]
    BuildTool,
}

impl PluginCapability {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BuildTool => "build_tool",
        }
    }
}

impl std::fmt::Display for PluginCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of a build-tool plugin.
///
/// # Example
///
/// ```
/// use kiln_plugins::PluginDeclaration;
/// use std::path::PathBuf;
///
/// let plugin = PluginDeclaration::new("codegen", PathBuf::from("/opt/plugins/codegen"))
///     .with_tools(vec!["protoc".into()]);
///
/// assert_eq!(plugin.name(), "codegen");
/// assert_eq!(plugin.tools(), ["protoc"]);
/// assert!(plugin.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDeclaration {
    name: String,
    #[serde(default)]
    capability: PluginCapability,
    #[serde(default)]
    tools: Vec<String>,
    executable: PathBuf,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tools_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
}

impl PluginDeclaration {
    /// Creates a build-tool declaration with no dependency tools.
    #[must_use]
    pub fn new(name: impl Into<String>, executable: PathBuf) -> Self {
        Self {
            name: name.into(),
            capability: PluginCapability::BuildTool,
            tools: Vec::new(),
            executable,
            args: Vec::new(),
            tools_version: None,
            timeout_secs: None,
        }
    }

    /// Declares the dependency tools the plugin may invoke.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    /// Sets default arguments passed to the plugin executable.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Records the tools version the plugin was built against.
    #[must_use]
    pub fn with_tools_version(mut self, version: impl Into<String>) -> Self {
        self.tools_version = Some(version.into());
        self
    }

    /// Overrides the host's invocation time budget for this plugin.
    #[must_use]
    pub const fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Validates the declaration, returning an error if it is malformed.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidDeclaration`] if the name is empty, the
    /// executable path is not absolute, a tool name is empty or the timeout
    /// override is zero.
    pub fn validate(&self) -> Result<(), PluginError> {
        let invalid = |message: String| PluginError::InvalidDeclaration {
            name: self.name.clone(),
            message,
        };
        if self.name.trim().is_empty() {
            return Err(invalid(String::from("plugin name must not be empty")));
        }
        if !self.executable.is_absolute() {
            return Err(invalid(format!(
                "plugin executable must be an absolute path, got '{}'",
                self.executable.display()
            )));
        }
        if self.tools.iter().any(|tool| tool.trim().is_empty()) {
            return Err(invalid(String::from("tool names must not be empty")));
        }
        if self.timeout_secs == Some(0) {
            return Err(invalid(String::from("timeout override must be greater than zero")));
        }
        Ok(())
    }

    /// Returns the plugin name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the plugin capability.
    #[must_use]
    pub const fn capability(&self) -> PluginCapability {
        self.capability
    }

    /// Returns the dependency tools the plugin may invoke.
    #[must_use]
    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    /// Returns the absolute path to the plugin executable.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Returns the default arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the declared tools version.
    #[must_use]
    pub fn tools_version(&self) -> Option<&str> {
        self.tools_version.as_deref()
    }

    /// Returns the per-plugin timeout override in seconds.
    #[must_use]
    pub const fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }
}
