//! The template service façade.
//!
//! [`TemplateService`] is what a host constructs once and shares behind an
//! `Arc`. It ties together:
//!
//! - the [`ConfigurationRegistry`], one [`Configuration`] per root path;
//! - the [`PluginExtensions`] applied when configurations are built;
//! - the host collaborators ([`PathResolver`], [`DatePatternProvider`], an
//!   optional [`HostContext`]) and the [`ContentHasher`] keying anonymous
//!   templates.
//!
//! # Named templates
//!
//! ```rust,ignore
//! let service = TemplateService::builder().root("templates/").build();
//! let page = service.load_template_with("templates/", "page.html", &model)?;
//! ```
//!
//! # Anonymous templates
//!
//! Literal template text is keyed by its digest, stored in the default
//! configuration's overlay and then rendered like any named template:
//!
//! ```rust,ignore
//! let page = service.load_template_from_string("Hi {{ name }}", &model)?;
//! ```
//!
//! # Locales
//!
//! Configurations take their date pattern from the locale they were built
//! with. The `*_localized` calls override it for one render only, by carrying
//! the locale's pattern in that render's context.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{KeyStrategy, ServiceConfig, DEFAULT_UPDATE_DELAY_SECS};
use crate::configuration::{Configuration, ConfigurationSettings, Refresh};
use crate::error::{Error, RenderError, Result};
use crate::extensions::PluginExtensions;
use crate::format::DATE_FORMAT_KEY;
use crate::hash::{ContentHasher, RawTextKey, Sha256Hasher};
use crate::host::{
    DatePatternProvider, HostContext, Locale, PathResolver, StandardDatePatterns,
    WorkingDirResolver,
};
use crate::html::HtmlTemplate;
use crate::registry::ConfigurationRegistry;
use crate::source::{FileSource, HostContextSource, TemplateSource};

/// Builder for [`TemplateService`].
pub struct TemplateServiceBuilder {
    root: Option<String>,
    host_context: Option<Arc<dyn HostContext>>,
    path_resolver: Arc<dyn PathResolver>,
    date_patterns: Arc<dyn DatePatternProvider>,
    hasher: Arc<dyn ContentHasher>,
    update_delay: u64,
    default_locale: Locale,
    extensions: PluginExtensions,
}

impl Default for TemplateServiceBuilder {
    fn default() -> Self {
        Self {
            root: None,
            host_context: None,
            path_resolver: Arc::new(WorkingDirResolver),
            date_patterns: Arc::new(StandardDatePatterns),
            hasher: Arc::new(Sha256Hasher),
            update_delay: DEFAULT_UPDATE_DELAY_SECS,
            default_locale: Locale::default(),
            extensions: PluginExtensions::new(),
        }
    }
}

impl TemplateServiceBuilder {
    /// Default root for anonymous templates.
    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Load primary templates through a host context instead of the
    /// filesystem.
    pub fn host_context(mut self, context: Arc<dyn HostContext>) -> Self {
        self.host_context = Some(context);
        self
    }

    /// Resolver turning configured roots into filesystem paths.
    pub fn path_resolver(mut self, resolver: impl PathResolver + 'static) -> Self {
        self.path_resolver = Arc::new(resolver);
        self
    }

    /// Provider of the date pattern for each build locale.
    pub fn date_patterns(mut self, provider: impl DatePatternProvider + 'static) -> Self {
        self.date_patterns = Arc::new(provider);
        self
    }

    /// Hasher keying anonymous templates.
    pub fn hasher(mut self, hasher: impl ContentHasher + 'static) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    /// Pick one of the built-in key strategies.
    pub fn key_strategy(self, strategy: KeyStrategy) -> Self {
        match strategy {
            KeyStrategy::Digest => self.hasher(Sha256Hasher),
            KeyStrategy::RawText => self.hasher(RawTextKey),
        }
    }

    /// Seconds before a template source is re-checked.
    pub fn update_delay(mut self, seconds: u64) -> Self {
        self.update_delay = seconds;
        self
    }

    /// Locale used when a configuration is built without one.
    pub fn default_locale(mut self, locale: impl Into<Locale>) -> Self {
        self.default_locale = locale.into();
        self
    }

    /// Splice `name` into every entry template.
    pub fn auto_include(self, name: impl Into<String>) -> Self {
        self.extensions.add_auto_include(name);
        self
    }

    /// Import `name` as `namespace` in every entry template.
    pub fn auto_import(self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.extensions.add_auto_import(namespace, name);
        self
    }

    /// Expose `value` as a global named `name`.
    pub fn shared_variable(self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extensions.set_shared_variable(name, value.into());
        self
    }

    /// Apply every setting from a [`ServiceConfig`].
    pub fn config(mut self, config: ServiceConfig) -> Self {
        if let Some(root) = config.root {
            self.root = Some(root);
        }
        if let Some(locale) = config.default_locale {
            self.default_locale = Locale::new(locale);
        }
        self.update_delay = config.update_delay;
        for name in config.auto_includes {
            self.extensions.add_auto_include(name);
        }
        for (namespace, name) in config.auto_imports {
            self.extensions.add_auto_import(namespace, name);
        }
        for (name, value) in config.shared_variables {
            self.extensions.set_shared_variable(name, value);
        }
        self.key_strategy(config.key_strategy)
    }

    /// Finish the service. No configuration is built yet.
    pub fn build(self) -> TemplateService {
        TemplateService {
            registry: ConfigurationRegistry::new(),
            extensions: self.extensions,
            default_root: RwLock::new(self.root),
            host_context: RwLock::new(self.host_context),
            path_resolver: self.path_resolver,
            date_patterns: self.date_patterns,
            hasher: self.hasher,
            update_delay: AtomicU64::new(self.update_delay),
            default_locale: self.default_locale,
        }
    }
}

/// Caching front end to the template engine.
pub struct TemplateService {
    registry: ConfigurationRegistry,
    extensions: PluginExtensions,
    default_root: RwLock<Option<String>>,
    host_context: RwLock<Option<Arc<dyn HostContext>>>,
    path_resolver: Arc<dyn PathResolver>,
    date_patterns: Arc<dyn DatePatternProvider>,
    hasher: Arc<dyn ContentHasher>,
    update_delay: AtomicU64,
    default_locale: Locale,
}

impl Default for TemplateService {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TemplateService {
    /// Start configuring a service.
    pub fn builder() -> TemplateServiceBuilder {
        TemplateServiceBuilder::default()
    }

    /// A service with default collaborators configured from `config`.
    pub fn from_config(config: ServiceConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Set the default root. Configurations already cached stay cached.
    pub fn init(&self, root: impl Into<String>) {
        let root = root.into();
        info!(root = %root, "template service initialised");
        *self.default_root.write() = Some(root);
    }

    /// Set the default root and serve primary templates through `context`
    /// for every configuration built from now on.
    pub fn init_with_context(&self, root: impl Into<String>, context: Arc<dyn HostContext>) {
        *self.host_context.write() = Some(context);
        self.init(root);
    }

    /// Seconds before a template source is re-checked, for configurations
    /// built from now on.
    pub fn set_update_delay(&self, seconds: u64) {
        self.update_delay.store(seconds, Ordering::Relaxed);
    }

    /// Delay applied to configurations built from now on.
    pub fn update_delay(&self) -> Duration {
        Duration::from_secs(self.update_delay.load(Ordering::Relaxed))
    }

    /// Root used for anonymous templates, once initialised.
    pub fn default_root(&self) -> Option<String> {
        self.default_root.read().clone()
    }

    /// Register an auto-include for configurations built from now on.
    pub fn add_auto_include(&self, name: impl Into<String>) {
        self.extensions.add_auto_include(name);
    }

    /// Same as [`add_auto_include`](Self::add_auto_include).
    pub fn add_plugin_macros(&self, name: impl Into<String>) {
        self.add_auto_include(name);
    }

    /// Register an auto-import for configurations built from now on.
    pub fn add_auto_import(&self, namespace: impl Into<String>, name: impl Into<String>) {
        self.extensions.add_auto_import(namespace, name);
    }

    /// Register a shared variable for configurations built from now on.
    pub fn set_shared_variable(&self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.extensions.set_shared_variable(name, value.into());
    }

    /// Extension lists applied at build time.
    pub fn extensions(&self) -> &PluginExtensions {
        &self.extensions
    }

    /// The configuration for `root`, built with the default locale if absent.
    pub fn configuration(&self, root: &str) -> Result<Arc<Configuration>> {
        self.configuration_for(root, &self.default_locale)
    }

    /// The configuration for `root`, built with `locale` if absent.
    ///
    /// A configuration already cached is returned as is, whatever locale it
    /// was built with.
    pub fn configuration_for(&self, root: &str, locale: &Locale) -> Result<Arc<Configuration>> {
        self.registry
            .get_or_build(root, || self.build_configuration(root, locale))
    }

    /// The configuration for the default root.
    pub fn default_configuration(&self) -> Result<Arc<Configuration>> {
        let root = self.default_root().ok_or(Error::NotInitialized)?;
        self.configuration(&root)
    }

    /// Build the default configuration with `locale` if it does not exist yet.
    pub fn prime_default(&self, locale: &Locale) -> Result<Arc<Configuration>> {
        let root = self.default_root().ok_or(Error::NotInitialized)?;
        self.configuration_for(&root, locale)
    }

    /// Number of configurations built so far.
    pub fn builds(&self) -> usize {
        self.registry.builds()
    }

    /// The cache of built configurations.
    pub fn registry(&self) -> &ConfigurationRegistry {
        &self.registry
    }

    fn build_configuration(&self, root: &str, locale: &Locale) -> Result<Configuration> {
        let context = self.host_context.read().clone();
        let primary: Arc<dyn TemplateSource> = match context {
            Some(context) => Arc::new(
                HostContextSource::new(context, root)
                    .map_err(|err| Error::configuration_build(root, err))?,
            ),
            None => {
                let path = self.path_resolver.absolute_path(root);
                Arc::new(FileSource::new(path).map_err(|err| Error::configuration_build(root, err))?)
            }
        };
        let settings = ConfigurationSettings {
            date_pattern: self.date_patterns.default_pattern(locale),
            update_delay: self.update_delay(),
            extensions: self.extensions.snapshot(),
        };
        debug!(root, locale = %locale, "building template configuration");
        Ok(Configuration::new(root, primary, settings))
    }

    /// Render `name` under `root` with an empty model.
    pub fn load_template(&self, root: &str, name: &str) -> Result<HtmlTemplate> {
        self.render_named(root, name, &(), None)
    }

    /// Render `name` under `root` using the configuration's date pattern.
    pub fn load_template_with<S: Serialize + ?Sized>(
        &self,
        root: &str,
        name: &str,
        model: &S,
    ) -> Result<HtmlTemplate> {
        self.render_named(root, name, model, None)
    }

    /// Render `name` under `root` formatting dates for `locale`.
    pub fn load_template_localized<S: Serialize + ?Sized>(
        &self,
        root: &str,
        name: &str,
        locale: &Locale,
        model: &S,
    ) -> Result<HtmlTemplate> {
        self.render_named(root, name, model, Some(locale))
    }

    /// Render literal template text with the default configuration.
    pub fn load_template_from_string<S: Serialize + ?Sized>(
        &self,
        text: &str,
        model: &S,
    ) -> Result<HtmlTemplate> {
        let key = self.hasher.key(text)?;
        self.render_inline(&key, text, None, model, Refresh::IfAbsent, true)
    }

    /// Render literal template text formatting dates for `locale`.
    pub fn load_template_from_string_localized<S: Serialize + ?Sized>(
        &self,
        text: &str,
        locale: &Locale,
        model: &S,
    ) -> Result<HtmlTemplate> {
        let key = self.hasher.key(text)?;
        self.render_inline(&key, text, Some(locale), model, Refresh::IfAbsent, true)
    }

    /// Render literal template text stored under an explicit `name`.
    ///
    /// With [`Refresh::IfAbsent`] an existing entry under `name` wins, even
    /// if `text` differs.
    pub fn load_named_template_from_string<S: Serialize + ?Sized>(
        &self,
        name: &str,
        text: &str,
        locale: &Locale,
        model: &S,
        refresh: Refresh,
    ) -> Result<HtmlTemplate> {
        self.render_inline(name, text, Some(locale), model, refresh, false)
    }

    /// Render literal template text stored under an explicit `name`, with
    /// the configuration's own date pattern.
    pub fn load_named_template_from_string_with<S: Serialize + ?Sized>(
        &self,
        name: &str,
        text: &str,
        model: &S,
        refresh: Refresh,
    ) -> Result<HtmlTemplate> {
        self.render_inline(name, text, None, model, refresh, false)
    }

    /// Drop every configuration. The next request rebuilds with the
    /// extension lists as they are now.
    pub fn reset_configuration(&self) {
        self.registry.invalidate_all();
    }

    /// Drop compiled templates of every cached configuration.
    pub fn reset_render_cache(&self) {
        self.registry.clear_render_caches();
    }

    /// Auto-includes of the default configuration, building it if needed.
    pub fn auto_includes(&self) -> Result<Vec<String>> {
        Ok(self.default_configuration()?.auto_includes())
    }

    /// Auto-imports of the default configuration, building it if needed.
    pub fn auto_imports(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.default_configuration()?.auto_imports())
    }

    /// Add an auto-include to the default configuration if it is built.
    ///
    /// Returns false when there is no default configuration to change.
    pub fn add_auto_include_to_default(&self, name: &str) -> bool {
        self.with_cached_default(|config| {
            config.add_auto_include(name);
            true
        })
    }

    /// Remove an auto-include from the default configuration if it is built.
    pub fn remove_auto_include_from_default(&self, name: &str) -> bool {
        self.with_cached_default(|config| config.remove_auto_include(name))
    }

    /// Add an auto-import to the default configuration if it is built.
    pub fn add_auto_import_to_default(&self, namespace: &str, name: &str) -> bool {
        self.with_cached_default(|config| {
            config.add_auto_import(namespace, name);
            true
        })
    }

    /// Remove an auto-import from the default configuration if it is built.
    pub fn remove_auto_import_from_default(&self, namespace: &str) -> bool {
        self.with_cached_default(|config| config.remove_auto_import(namespace))
    }

    fn with_cached_default(&self, apply: impl FnOnce(&Configuration) -> bool) -> bool {
        let Some(root) = self.default_root() else {
            return false;
        };
        match self.registry.get(&root) {
            Some(config) => apply(&config),
            None => false,
        }
    }

    fn render_named<S: Serialize + ?Sized>(
        &self,
        root: &str,
        name: &str,
        model: &S,
        locale: Option<&Locale>,
    ) -> Result<HtmlTemplate> {
        let config = self.configuration(root)?;
        self.render_with(&config, name, model, locale)
    }

    fn render_inline<S: Serialize + ?Sized>(
        &self,
        key: &str,
        text: &str,
        locale: Option<&Locale>,
        model: &S,
        refresh: Refresh,
        content_keyed: bool,
    ) -> Result<HtmlTemplate> {
        let config = self.default_configuration()?;
        config.store_inline(key, text, refresh, content_keyed);
        self.render_with(&config, key, model, locale)
    }

    fn render_with<S: Serialize + ?Sized>(
        &self,
        config: &Configuration,
        name: &str,
        model: &S,
        locale: Option<&Locale>,
    ) -> Result<HtmlTemplate> {
        let pattern = locale.map(|locale| self.date_patterns.default_pattern(locale));
        let context = render_context(model, pattern)?;
        let html = config.render(name, &context)?;
        Ok(HtmlTemplate::new(html))
    }
}

impl fmt::Debug for TemplateService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateService")
            .field("default_root", &self.default_root())
            .field("update_delay", &self.update_delay())
            .field("default_locale", &self.default_locale)
            .field("has_host_context", &self.host_context.read().is_some())
            .field("configurations", &self.registry.roots())
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

/// Turn `model` into a render context, adding the per-render date pattern.
fn render_context<S: Serialize + ?Sized>(
    model: &S,
    date_pattern: Option<String>,
) -> Result<minijinja::Value, RenderError> {
    let mut map = match serde_json::to_value(model)? {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            return Err(RenderError::InvalidModel {
                kind: json_kind(&other),
            })
        }
    };
    if let Some(pattern) = date_pattern {
        map.insert(DATE_FORMAT_KEY.to_string(), serde_json::Value::String(pattern));
    }
    Ok(minijinja::Value::from_serialize(&map))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashingUnavailable;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_template_file(dir: &std::path::Path, relative_path: &str, content: &str) {
        let full_path = dir.join(relative_path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut file = std::fs::File::create(&full_path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn service_at(dir: &TempDir) -> TemplateService {
        let root = dir.path().to_string_lossy().into_owned();
        TemplateService::builder().root(root).update_delay(3600).build()
    }

    fn root_of(dir: &TempDir) -> String {
        dir.path().to_string_lossy().into_owned()
    }

    #[test]
    fn test_load_template_from_root() {
        let dir = TempDir::new().unwrap();
        create_template_file(dir.path(), "hello.html", "Hello {{ name }}!");
        let service = service_at(&dir);

        let out = service
            .load_template_with(&root_of(&dir), "hello.html", &json!({ "name": "World" }))
            .unwrap();
        assert_eq!(out.html(), "Hello World!");

        let bare = service.load_template(&root_of(&dir), "hello.html").unwrap();
        assert_eq!(bare.html(), "Hello !");
    }

    #[test]
    fn test_missing_root_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);
        let missing = dir.path().join("nope").to_string_lossy().into_owned();

        let err = service.load_template(&missing, "x.html").unwrap_err();
        assert!(matches!(err, Error::ConfigurationBuild { .. }));
        assert_eq!(service.builds(), 0);
    }

    #[test]
    fn test_missing_template_is_render_error() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);

        let err = service.load_template(&root_of(&dir), "x.html").unwrap_err();
        assert!(err.as_render().is_some_and(RenderError::is_not_found));
    }

    #[test]
    fn test_not_initialized() {
        let service = TemplateService::default();
        let err = service.load_template_from_string("x", &()).unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
        assert!(!service.add_auto_include_to_default("a"));
    }

    #[test]
    fn test_model_must_be_a_map() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);
        let err = service.load_template_from_string("x", &[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            Error::Render(RenderError::InvalidModel { kind: "array" })
        ));
    }

    #[test]
    fn test_hashing_unavailable() {
        let dir = TempDir::new().unwrap();
        let service = TemplateService::builder()
            .root(root_of(&dir))
            .hasher(|_: &str| -> std::result::Result<String, HashingUnavailable> {
                Err(HashingUnavailable::new("no digest"))
            })
            .build();

        let err = service.load_template_from_string("x", &()).unwrap_err();
        assert!(matches!(err, Error::HashingUnavailable(_)));

        // Named templates do not need a digest.
        let out = service
            .load_named_template_from_string("n", "ok", &Locale::default(), &(), Refresh::IfAbsent)
            .unwrap();
        assert_eq!(out.html(), "ok");
    }

    #[test]
    fn test_anonymous_key_is_digest() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);
        service.load_template_from_string("Body", &()).unwrap();

        let config = service.default_configuration().unwrap();
        let key = Sha256Hasher.key("Body").unwrap();
        assert_eq!(config.overlay().names(), vec![key]);
    }

    #[test]
    fn test_raw_text_strategy() {
        let dir = TempDir::new().unwrap();
        let service = TemplateService::builder()
            .root(root_of(&dir))
            .key_strategy(KeyStrategy::RawText)
            .build();
        service.load_template_from_string("Body {{ 1 + 1 }}", &()).unwrap();

        let config = service.default_configuration().unwrap();
        assert!(config.overlay().contains("Body {{ 1 + 1 }}"));
    }

    #[test]
    fn test_primary_wins_over_overlay_for_named_inline() {
        let dir = TempDir::new().unwrap();
        create_template_file(dir.path(), "page.html", "from file");
        let service = service_at(&dir);

        let out = service
            .load_named_template_from_string(
                "page.html",
                "from string",
                &Locale::default(),
                &(),
                Refresh::Force,
            )
            .unwrap();
        assert_eq!(out.html(), "from file");
    }

    #[test]
    fn test_shared_variables_and_imports_from_config() {
        let dir = TempDir::new().unwrap();
        create_template_file(dir.path(), "ui.j2", "{% macro tag(x) %}<{{ x }}>{% endmacro %}");
        let config = ServiceConfig::from_yaml(&format!(
            "root: {}\nauto_imports: {{ ui: ui.j2 }}\nshared_variables: {{ site: Portal }}\n",
            root_of(&dir)
        ))
        .unwrap();
        let service = TemplateService::from_config(config);

        let out = service
            .load_template_from_string("{{ ui.tag(site) }}", &())
            .unwrap();
        assert_eq!(out.html(), "<Portal>");
        assert_eq!(
            service.auto_imports().unwrap().get("ui").map(String::as_str),
            Some("ui.j2")
        );
    }

    #[test]
    fn test_model_shadows_shared_variable() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);
        service.set_shared_variable("site", "Portal");

        let out = service
            .load_template_from_string("{{ site }}", &json!({ "site": "Mine" }))
            .unwrap();
        assert_eq!(out.html(), "Mine");
    }

    #[test]
    fn test_late_extension_needs_reset() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);
        service.load_template_from_string("{{ site }}", &()).unwrap();

        service.set_shared_variable("site", "Portal");
        let before = service.load_template_from_string("{{ site }}", &()).unwrap();
        assert_eq!(before.html(), "");

        service.reset_configuration();
        let after = service.load_template_from_string("{{ site }}", &()).unwrap();
        assert_eq!(after.html(), "Portal");
    }

    #[test]
    fn test_prime_default_uses_locale() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);

        let config = service.prime_default(&Locale::new("de_DE")).unwrap();
        assert_eq!(config.date_pattern(), "%d.%m.%Y");

        // Already built: a second priming keeps the first locale.
        let again = service.prime_default(&Locale::new("fr_FR")).unwrap();
        assert!(Arc::ptr_eq(&config, &again));
    }

    #[test]
    fn test_named_inline_with_build_date_pattern() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);
        service.prime_default(&Locale::new("de_DE")).unwrap();
        let model = json!({ "day": "2024-03-09" });

        let out = service
            .load_named_template_from_string_with("when", "{{ day | date }}", &model, Refresh::IfAbsent)
            .unwrap();
        assert_eq!(out.html(), "09.03.2024");

        let kept = service
            .load_named_template_from_string_with("when", "other", &model, Refresh::IfAbsent)
            .unwrap();
        assert_eq!(kept.html(), "09.03.2024");

        let forced = service
            .load_named_template_from_string_with("when", "[{{ day | date }}]", &model, Refresh::Force)
            .unwrap();
        assert_eq!(forced.html(), "[09.03.2024]");
    }

    #[test]
    fn test_init_switches_default_root() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let service = service_at(&first);
        service.load_template_from_string("a", &()).unwrap();

        service.init(root_of(&second));
        assert_eq!(service.default_root(), Some(root_of(&second)));
        service.load_template_from_string("a", &()).unwrap();
        assert_eq!(service.builds(), 2);
        assert!(service.registry().get(&root_of(&first)).is_some());
    }

    #[test]
    fn test_update_delay_applies_to_new_configurations() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);
        service.set_update_delay(7);

        let config = service.default_configuration().unwrap();
        assert_eq!(config.update_delay(), Duration::from_secs(7));
    }

    #[test]
    fn test_plugin_macros_alias() {
        let service = TemplateService::default();
        service.add_plugin_macros("macros.j2");
        assert_eq!(service.extensions().auto_includes(), vec!["macros.j2"]);
    }

    #[test]
    fn test_render_context_rejects_scalars() {
        let err = render_context(&"text", None).unwrap_err();
        assert!(matches!(err, RenderError::InvalidModel { kind: "string" }));

        let ctx = render_context(&(), Some("%Y".to_string())).unwrap();
        assert_eq!(
            ctx.get_attr(DATE_FORMAT_KEY).unwrap().as_str(),
            Some("%Y")
        );
    }
}
