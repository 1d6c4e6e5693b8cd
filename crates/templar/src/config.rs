//! Service configuration file.
//!
//! A [`ServiceConfig`] describes a [`TemplateService`](crate::TemplateService)
//! declaratively. Every field is optional:
//!
//! ```yaml
//! root: templates/
//! update_delay: 30          # seconds
//! default_locale: fr_FR
//! auto_includes: [macros.j2]
//! auto_imports: { ui: ui.j2 }
//! shared_variables: { site_name: "Portal" }
//! key_strategy: digest      # digest | raw_text
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Update delay applied when none is configured, in seconds.
pub const DEFAULT_UPDATE_DELAY_SECS: u64 = 0;

/// How anonymous templates are keyed in the overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// A digest of the template text.
    #[default]
    Digest,
    /// The template text itself.
    RawText,
}

/// Declarative service settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Default root used for anonymous templates.
    pub root: Option<String>,
    /// Seconds before a template source is re-checked.
    pub update_delay: u64,
    /// Locale used when a configuration is built without one.
    pub default_locale: Option<String>,
    pub auto_includes: Vec<String>,
    pub auto_imports: BTreeMap<String, String>,
    pub shared_variables: BTreeMap<String, serde_json::Value>,
    pub key_strategy: KeyStrategy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            root: None,
            update_delay: DEFAULT_UPDATE_DELAY_SECS,
            default_locale: None,
            auto_includes: Vec::new(),
            auto_imports: BTreeMap::new(),
            shared_variables: BTreeMap::new(),
            key_strategy: KeyStrategy::default(),
        }
    }
}

impl ServiceConfig {
    /// Parse settings from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is not valid.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML settings file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }
}
