//! Plugin registry for declaration storage and lookup.
//!
//! The [`PluginRegistry`] stores validated plugin declarations keyed by name.
//! Duplicate registrations for the same plugin name are rejected. Declaring a
//! plugin never causes it to run; only targets that list it in their plugin
//! usages trigger invocations.

use std::collections::BTreeMap;

use crate::declaration::PluginDeclaration;
use crate::error::PluginError;

/// Registry of available plugin declarations.
///
/// # Example
///
/// ```
/// use kiln_plugins::{PluginDeclaration, PluginRegistry};
/// use std::path::PathBuf;
///
/// let mut registry = PluginRegistry::new();
/// registry
///     .register(PluginDeclaration::new("codegen", PathBuf::from("/opt/codegen")))
///     .expect("registration succeeds");
/// assert!(registry.get("codegen").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    declarations: BTreeMap<String, PluginDeclaration>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin declaration after validation.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidDeclaration`] if validation fails or
    /// [`PluginError::Duplicate`] if a plugin with the same name is already
    /// registered.
    pub fn register(&mut self, declaration: PluginDeclaration) -> Result<(), PluginError> {
        declaration.validate()?;
        let name = declaration.name().to_owned();
        if self.declarations.contains_key(&name) {
            return Err(PluginError::Duplicate { name });
        }
        self.declarations.insert(name, declaration);
        Ok(())
    }

    /// Looks up a plugin by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PluginDeclaration> {
        self.declarations.get(name)
    }

    /// Returns every declaration in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginDeclaration> {
        self.declarations.values()
    }

    /// Returns the number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Returns `true` when no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}
