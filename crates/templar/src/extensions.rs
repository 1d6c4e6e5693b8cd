//! Extension points contributed by plugins.
//!
//! Plugins register auto-includes, auto-imports and shared variables while
//! the host starts up. The lists are read once per configuration build; a
//! configuration that is already cached keeps what it saw at build time until
//! the registry is reset.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

/// Everything a configuration copies from the extension lists when it is
/// built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionSnapshot {
    /// Auto-include template names in registration order.
    pub auto_includes: Vec<String>,
    /// Namespace to template name.
    pub auto_imports: BTreeMap<String, String>,
    /// Variables visible to every template.
    pub shared_variables: BTreeMap<String, serde_json::Value>,
}

/// Process-wide extension lists owned by a [`TemplateService`](crate::TemplateService).
#[derive(Debug, Default)]
pub struct PluginExtensions {
    auto_includes: RwLock<Vec<String>>,
    auto_imports: RwLock<BTreeMap<String, String>>,
    shared_variables: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl PluginExtensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an auto-include. Registering the same name twice keeps the
    /// first position.
    pub fn add_auto_include(&self, name: impl Into<String>) {
        let name = name.into();
        let mut includes = self.auto_includes.write();
        if includes.contains(&name) {
            return;
        }
        debug!(template = %name, "registered auto-include");
        includes.push(name);
    }

    /// Map `namespace` to `name`, replacing any previous mapping.
    pub fn add_auto_import(&self, namespace: impl Into<String>, name: impl Into<String>) {
        let namespace = namespace.into();
        let name = name.into();
        debug!(namespace = %namespace, template = %name, "registered auto-import");
        self.auto_imports.write().insert(namespace, name);
    }

    /// Set a shared variable, replacing any previous value.
    pub fn set_shared_variable(&self, name: impl Into<String>, value: serde_json::Value) {
        let name = name.into();
        debug!(variable = %name, "registered shared variable");
        self.shared_variables.write().insert(name, value);
    }

    pub fn auto_includes(&self) -> Vec<String> {
        self.auto_includes.read().clone()
    }

    pub fn auto_imports(&self) -> BTreeMap<String, String> {
        self.auto_imports.read().clone()
    }

    pub fn shared_variables(&self) -> BTreeMap<String, serde_json::Value> {
        self.shared_variables.read().clone()
    }

    /// Copy all lists for a configuration build.
    pub fn snapshot(&self) -> ExtensionSnapshot {
        ExtensionSnapshot {
            auto_includes: self.auto_includes(),
            auto_imports: self.auto_imports(),
            shared_variables: self.shared_variables(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auto_includes_keep_order_without_duplicates() {
        let ext = PluginExtensions::new();
        ext.add_auto_include("a.j2");
        ext.add_auto_include("b.j2");
        ext.add_auto_include("a.j2");

        assert_eq!(ext.auto_includes(), vec!["a.j2", "b.j2"]);
    }

    #[test]
    fn test_imports_and_variables_overwrite() {
        let ext = PluginExtensions::new();
        ext.add_auto_import("ui", "ui_v1.j2");
        ext.add_auto_import("ui", "ui_v2.j2");
        ext.set_shared_variable("site", json!("Old"));
        ext.set_shared_variable("site", json!("New"));

        let snapshot = ext.snapshot();
        assert_eq!(snapshot.auto_imports.get("ui").map(String::as_str), Some("ui_v2.j2"));
        assert_eq!(snapshot.shared_variables.get("site"), Some(&json!("New")));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let ext = PluginExtensions::new();
        ext.add_auto_include("a.j2");
        let snapshot = ext.snapshot();
        ext.add_auto_include("b.j2");

        assert_eq!(snapshot.auto_includes, vec!["a.j2".to_string()]);
    }
}
