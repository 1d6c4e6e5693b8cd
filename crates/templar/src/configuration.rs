//! One root path's rendering context.
//!
//! A [`Configuration`] bundles everything needed to render templates found
//! under a root path: the source resolver, the engine environment that
//! doubles as the render cache, the auto-includes and auto-imports applied to
//! every entry template, the shared variables, and the formatting settings.
//!
//! # Entry templates
//!
//! The template named in a render call is the *entry*. Before it is compiled
//! the configuration composes its source:
//!
//! ```text
//! {% import "ui.j2" as ui %}...     one per auto-import
//! <text of each auto-include>       in registration order
//! <text of the entry template>
//! ```
//!
//! Templates the entry reaches through `include`, `import` or `extends` are
//! loaded as written, without the preamble.
//!
//! # Freshness
//!
//! Every source read is stamped with its last-modified time. Once the update
//! delay has elapsed the stamp is re-checked on the next render; a changed
//! source is dropped from the environment together with every entry that
//! spliced it in, and recompiled on next use. A render only re-checks the
//! sources spliced into its own entry and the templates loaded by reference.
//!
//! # Overlay writes
//!
//! [`Configuration::store_inline`] decides, writes and evicts while holding
//! the environment write lock. Every eviction bumps an epoch, and a render
//! that composed its entry under an older epoch composes it again, so a
//! replaced overlay body is never compiled after its replacement.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use minijinja::{Environment, ErrorKind, Value};
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, trace, warn};

use crate::cache::RenderCache;
use crate::engine::{build_environment, entry_key};
use crate::error::RenderError;
use crate::extensions::ExtensionSnapshot;
use crate::format::NUMBER_FORMAT_PATTERN;
use crate::source::{SourceResolver, StringSource, TemplateSource};

/// Whether an inline render may replace an existing overlay entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Refresh {
    /// Store the text only if no entry exists under the key. Content-keyed
    /// entries whose text differs are still replaced.
    #[default]
    IfAbsent,
    /// Always store the text and recompile.
    Force,
}

/// Settings fixed when a configuration is built.
#[derive(Debug, Clone)]
pub struct ConfigurationSettings {
    /// Date pattern derived from the build locale.
    pub date_pattern: String,
    /// How long a source is trusted before it is re-checked.
    pub update_delay: Duration,
    /// Extension lists captured at build time.
    pub extensions: ExtensionSnapshot,
}

/// A fully prepared rendering context for one root path.
pub struct Configuration {
    root: String,
    date_pattern: String,
    shared_variables: BTreeMap<String, serde_json::Value>,
    auto_includes: RwLock<Vec<String>>,
    auto_imports: RwLock<BTreeMap<String, String>>,
    // Bumped on every eviction so in-flight compositions retry.
    epoch: AtomicU64,
    sources: Arc<SourceResolver>,
    cache: Arc<RenderCache>,
    env: RwLock<Environment<'static>>,
}

impl Configuration {
    /// Build a configuration whose primary backend is `primary`.
    pub fn new(
        root: impl Into<String>,
        primary: Arc<dyn TemplateSource>,
        settings: ConfigurationSettings,
    ) -> Self {
        let root = root.into();
        let sources = Arc::new(SourceResolver::new(primary));
        let cache = Arc::new(RenderCache::new(settings.update_delay));
        let ExtensionSnapshot {
            auto_includes,
            auto_imports,
            shared_variables,
        } = settings.extensions;
        let env = build_environment(
            sources.clone(),
            cache.clone(),
            &settings.date_pattern,
            &shared_variables,
        );
        debug!(
            root = %root,
            sources = ?sources.describe(),
            auto_includes = auto_includes.len(),
            auto_imports = auto_imports.len(),
            "built template configuration"
        );
        Self {
            root,
            date_pattern: settings.date_pattern,
            shared_variables,
            auto_includes: RwLock::new(auto_includes),
            auto_imports: RwLock::new(auto_imports),
            epoch: AtomicU64::new(0),
            sources,
            cache,
            env: RwLock::new(env),
        }
    }

    /// The root path this configuration serves.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Date pattern chosen at build time.
    pub fn date_pattern(&self) -> &str {
        &self.date_pattern
    }

    pub fn number_format(&self) -> &'static str {
        NUMBER_FORMAT_PATTERN
    }

    pub fn update_delay(&self) -> Duration {
        self.cache.update_delay()
    }

    /// Template names are never decorated with a locale suffix.
    pub fn localized_lookup(&self) -> bool {
        false
    }

    pub fn shared_variables(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.shared_variables
    }

    /// Auto-includes in the order they are spliced.
    pub fn auto_includes(&self) -> Vec<String> {
        self.auto_includes.read().clone()
    }

    pub fn auto_imports(&self) -> BTreeMap<String, String> {
        self.auto_imports.read().clone()
    }

    /// Add an auto-include at the end of the list. An existing entry with
    /// the same name is moved to the end.
    pub fn add_auto_include(&self, name: &str) {
        self.change_preamble(|| {
            let mut includes = self.auto_includes.write();
            includes.retain(|existing| existing != name);
            includes.push(name.to_string());
            true
        });
    }

    /// Remove an auto-include. Returns false if it was not present.
    pub fn remove_auto_include(&self, name: &str) -> bool {
        self.change_preamble(|| {
            let mut includes = self.auto_includes.write();
            let before = includes.len();
            includes.retain(|existing| existing != name);
            includes.len() != before
        })
    }

    /// Map `namespace` to `name` for every entry template.
    pub fn add_auto_import(&self, namespace: &str, name: &str) {
        self.change_preamble(|| {
            self.auto_imports
                .write()
                .insert(namespace.to_string(), name.to_string());
            true
        });
    }

    /// Remove the import bound to `namespace`. Returns false if none was.
    pub fn remove_auto_import(&self, namespace: &str) -> bool {
        self.change_preamble(|| self.auto_imports.write().remove(namespace).is_some())
    }

    /// The resolver backing this configuration.
    pub fn sources(&self) -> &SourceResolver {
        &self.sources
    }

    /// The in-memory overlay.
    pub fn overlay(&self) -> &StringSource {
        self.sources.overlay()
    }

    /// Number of compilations since the configuration was built.
    pub fn compilations(&self) -> usize {
        self.cache.compilations()
    }

    /// Number of entry templates currently compiled.
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Drop `name` and every entry depending on it from the render cache.
    pub fn evict(&self, name: &str) {
        let mut env = self.env.write();
        self.evict_locked(&mut env, name);
    }

    /// Store `text` in the overlay under `key` if `refresh` allows it.
    ///
    /// An existing entry is replaced when `refresh` is [`Refresh::Force`], or
    /// when `content_keyed` is set and the stored text differs. A write
    /// evicts `key` before any other render can compile it. Returns whether
    /// the overlay was written.
    pub fn store_inline(
        &self,
        key: &str,
        text: &str,
        refresh: Refresh,
        content_keyed: bool,
    ) -> bool {
        let mut env = self.env.write();
        let overlay = self.sources.overlay();
        let store = match refresh {
            Refresh::Force => true,
            Refresh::IfAbsent => match overlay.get(key) {
                None => true,
                Some(existing) => content_keyed && existing != text,
            },
        };
        if store {
            overlay.put(key, text);
            self.evict_locked(&mut env, key);
        }
        store
    }

    /// Drop every compiled template. The configuration itself stays valid.
    pub fn clear_render_cache(&self) {
        let mut env = self.env.write();
        env.clear_templates();
        self.cache.clear();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        debug!(root = %self.root, "cleared render cache");
    }

    fn evict_locked(&self, env: &mut Environment<'static>, name: &str) {
        env.remove_template(name);
        env.remove_template(&entry_key(name));
        for entry in self.cache.invalidate(name) {
            env.remove_template(&entry);
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        trace!(root = %self.root, template = name, "evicted template");
    }

    /// Render the entry template `name` with `context`.
    pub fn render(&self, name: &str, context: &Value) -> Result<String, RenderError> {
        let key = entry_key(name);
        self.refresh_stale(&key);

        loop {
            {
                let env = self.env.read();
                match env.get_template(&key) {
                    Ok(template) => {
                        return template
                            .render(context)
                            .map_err(|err| RenderError::engine(name, err));
                    }
                    Err(err) if err.kind() == ErrorKind::TemplateNotFound => {}
                    Err(err) => return Err(RenderError::engine(name, err)),
                }
            }

            let epoch = self.epoch.load(Ordering::Acquire);
            let (source, dependencies) = self.compose(name)?;

            let mut env = self.env.write();
            if self.epoch.load(Ordering::Acquire) != epoch {
                trace!(root = %self.root, template = name, "entry evicted while composing, retrying");
                continue;
            }
            if !self.cache.has_entry(&key) {
                env.add_template_owned(key.clone(), source)
                    .map_err(|err| RenderError::engine(name, err))?;
                self.cache.record_entry(&key, dependencies);
                debug!(root = %self.root, template = name, "compiled entry template");
            }
            let env = RwLockWriteGuard::downgrade(env);
            let template = env
                .get_template(&key)
                .map_err(|err| RenderError::engine(name, err))?;
            return template
                .render(context)
                .map_err(|err| RenderError::engine(name, err));
        }
    }

    /// Build the entry source for `name` and list the sources it spliced.
    fn compose(&self, name: &str) -> Result<(String, Vec<String>), RenderError> {
        let imports = self.auto_imports();
        let includes = self.auto_includes();

        let mut source = String::new();
        for (namespace, file) in &imports {
            source.push_str(&format!("{{% import {} as {} %}}", quote(file), namespace));
        }

        let mut dependencies = Vec::with_capacity(includes.len() + 1);
        for include in &includes {
            source.push_str(&self.read_source(include)?);
            dependencies.push(include.clone());
        }
        source.push_str(&self.read_source(name)?);
        dependencies.push(name.to_string());

        Ok((source, dependencies))
    }

    fn read_source(&self, name: &str) -> Result<String, RenderError> {
        let found = self
            .sources
            .resolve(name)
            .map_err(|err| RenderError::read_failure(name, err))?
            .ok_or_else(|| RenderError::not_found(name))?;
        self.cache.record_load(name, found.last_modified);
        Ok(found.content)
    }

    fn refresh_stale(&self, entry: &str) {
        let due = self.cache.due_for_check(entry, Instant::now());
        if due.is_empty() {
            return;
        }

        let mut changed = Vec::new();
        for (name, recorded) in due {
            match self.sources.last_modified(&name) {
                Ok(Some(current)) if current == recorded => self.cache.confirm_fresh(&name),
                Ok(_) => changed.push(name),
                Err(err) => {
                    warn!(template = %name, error = %err, "could not check template freshness");
                    changed.push(name);
                }
            }
        }
        if changed.is_empty() {
            return;
        }

        let mut env = self.env.write();
        for name in changed {
            debug!(root = %self.root, template = %name, "template source changed");
            self.evict_locked(&mut env, &name);
        }
    }

    /// Apply a preamble change and drop composed entries if it took effect.
    fn change_preamble(&self, apply: impl FnOnce() -> bool) -> bool {
        let mut env = self.env.write();
        if !apply() {
            return false;
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        for entry in self.cache.take_entries() {
            env.remove_template(&entry);
        }
        debug!(root = %self.root, "preamble changed, cleared entry templates");
        true
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("root", &self.root)
            .field("date_pattern", &self.date_pattern)
            .field("update_delay", &self.update_delay())
            .field("auto_includes", &*self.auto_includes.read())
            .field("auto_imports", &*self.auto_imports.read())
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ResolvedSource;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::time::SystemTime;

    /// A primary backend whose modification times tests control.
    #[derive(Default)]
    struct VersionedSource {
        templates: Mutex<HashMap<String, (String, u64)>>,
        checks: AtomicUsize,
    }

    impl VersionedSource {
        fn set(&self, name: &str, body: &str, version: u64) {
            self.templates
                .lock()
                .insert(name.to_string(), (body.to_string(), version));
        }
    }

    impl TemplateSource for VersionedSource {
        fn try_resolve(&self, name: &str) -> io::Result<Option<ResolvedSource>> {
            Ok(self.templates.lock().get(name).map(|(body, version)| {
                ResolvedSource::new(
                    body.clone(),
                    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(*version)),
                )
            }))
        }

        fn last_modified(&self, name: &str) -> io::Result<Option<Option<SystemTime>>> {
            self.checks.fetch_add(1, Ordering::Relaxed);
            Ok(self
                .templates
                .lock()
                .get(name)
                .map(|(_, version)| Some(SystemTime::UNIX_EPOCH + Duration::from_secs(*version))))
        }

        fn describe(&self) -> String {
            "versioned".to_string()
        }
    }

    fn configuration(
        primary: Arc<VersionedSource>,
        update_delay: Duration,
        extensions: ExtensionSnapshot,
    ) -> Configuration {
        Configuration::new(
            "templates/",
            primary,
            ConfigurationSettings {
                date_pattern: "%d/%m/%Y".to_string(),
                update_delay,
                extensions,
            },
        )
    }

    fn empty() -> Value {
        Value::from_serialize(serde_json::Map::new())
    }

    #[test]
    fn test_fixed_settings() {
        let config = configuration(Arc::default(), Duration::from_secs(5), ExtensionSnapshot::default());
        assert_eq!(config.root(), "templates/");
        assert_eq!(config.number_format(), "0.######");
        assert_eq!(config.date_pattern(), "%d/%m/%Y");
        assert_eq!(config.update_delay(), Duration::from_secs(5));
        assert!(!config.localized_lookup());
    }

    #[test]
    fn test_render_compiles_once() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("page", "Hello {{ who }}", 1);
        let config = configuration(primary, Duration::from_secs(3600), ExtensionSnapshot::default());

        let ctx = Value::from_serialize(serde_json::json!({ "who": "World" }));
        assert_eq!(config.render("page", &ctx).unwrap(), "Hello World");
        assert_eq!(config.render("page", &ctx).unwrap(), "Hello World");
        assert_eq!(config.compilations(), 1);
        assert_eq!(config.cached_entries(), 1);
    }

    #[test]
    fn test_missing_entry_is_not_found() {
        let config = configuration(Arc::default(), Duration::ZERO, ExtensionSnapshot::default());
        let err = config.render("nope", &empty()).unwrap_err();
        assert!(matches!(err, RenderError::TemplateNotFound { ref name } if name == "nope"));
    }

    #[test]
    fn test_missing_auto_include_is_not_found() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("page", "body", 1);
        let extensions = ExtensionSnapshot {
            auto_includes: vec!["macros.j2".into()],
            ..Default::default()
        };
        let config = configuration(primary, Duration::ZERO, extensions);

        let err = config.render("page", &empty()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_preamble_applies_to_entry_only() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("macros.j2", "{% macro shout(x) %}{{ x | upper }}{% endmacro %}", 1);
        primary.set("ui.j2", "{% macro badge(x) %}[{{ x }}]{% endmacro %}", 1);
        primary.set("part", "part", 1);
        primary.set("page", "{{ shout('hi') }} {{ ui.badge(site) }} {% include 'part' %}", 1);
        let mut shared = BTreeMap::new();
        shared.insert("site".to_string(), serde_json::json!("Portal"));
        let mut imports = BTreeMap::new();
        imports.insert("ui".to_string(), "ui.j2".to_string());
        let extensions = ExtensionSnapshot {
            auto_includes: vec!["macros.j2".into()],
            auto_imports: imports,
            shared_variables: shared,
        };
        let config = configuration(primary, Duration::from_secs(3600), extensions);

        let out = config.render("page", &empty()).unwrap();
        assert_eq!(out, "HI [Portal] part");
    }

    #[test]
    fn test_auto_include_changes_clear_entries() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("header", "HEADER ", 1);
        primary.set("page", "body", 1);
        let config = configuration(primary, Duration::from_secs(3600), ExtensionSnapshot::default());

        assert_eq!(config.render("page", &empty()).unwrap(), "body");

        config.add_auto_include("header");
        assert_eq!(config.auto_includes(), vec!["header".to_string()]);
        assert_eq!(config.render("page", &empty()).unwrap(), "HEADER body");

        assert!(config.remove_auto_include("header"));
        assert!(!config.remove_auto_include("header"));
        assert_eq!(config.render("page", &empty()).unwrap(), "body");
    }

    #[test]
    fn test_add_auto_include_moves_to_end() {
        let config = configuration(Arc::default(), Duration::ZERO, ExtensionSnapshot {
            auto_includes: vec!["a".into(), "b".into()],
            ..Default::default()
        });
        config.add_auto_include("a");
        assert_eq!(config.auto_includes(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_auto_import_add_remove() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("ui.j2", "{% macro hi() %}hi{% endmacro %}", 1);
        primary.set("page", "{% if ui is defined %}{{ ui.hi() }}{% else %}none{% endif %}", 1);
        let config = configuration(primary, Duration::from_secs(3600), ExtensionSnapshot::default());

        assert_eq!(config.render("page", &empty()).unwrap(), "none");
        config.add_auto_import("ui", "ui.j2");
        assert_eq!(config.render("page", &empty()).unwrap(), "hi");
        assert!(config.remove_auto_import("ui"));
        assert!(!config.remove_auto_import("ui"));
        assert_eq!(config.render("page", &empty()).unwrap(), "none");
    }

    #[test]
    fn test_changed_source_recompiled_after_delay() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("page", "v1", 1);
        let config = configuration(primary.clone(), Duration::ZERO, ExtensionSnapshot::default());

        assert_eq!(config.render("page", &empty()).unwrap(), "v1");
        assert_eq!(config.render("page", &empty()).unwrap(), "v1");
        assert_eq!(config.compilations(), 1);

        primary.set("page", "v2", 2);
        assert_eq!(config.render("page", &empty()).unwrap(), "v2");
        assert_eq!(config.compilations(), 2);
    }

    #[test]
    fn test_changed_source_kept_within_delay() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("page", "v1", 1);
        let config = configuration(primary.clone(), Duration::from_secs(3600), ExtensionSnapshot::default());

        assert_eq!(config.render("page", &empty()).unwrap(), "v1");
        primary.set("page", "v2", 2);
        assert_eq!(config.render("page", &empty()).unwrap(), "v1");
    }

    #[test]
    fn test_changed_include_recompiled() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("part", "old", 1);
        primary.set("page", "[{% include 'part' %}]", 1);
        let config = configuration(primary.clone(), Duration::ZERO, ExtensionSnapshot::default());

        assert_eq!(config.render("page", &empty()).unwrap(), "[old]");
        primary.set("part", "new", 2);
        assert_eq!(config.render("page", &empty()).unwrap(), "[new]");
    }

    #[test]
    fn test_clear_render_cache_forces_recompile() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("page", "x", 1);
        let config = configuration(primary, Duration::from_secs(3600), ExtensionSnapshot::default());

        config.render("page", &empty()).unwrap();
        config.clear_render_cache();
        assert_eq!(config.cached_entries(), 0);
        config.render("page", &empty()).unwrap();
        assert_eq!(config.compilations(), 2);
    }

    #[test]
    fn test_overlay_fallback_and_evict() {
        let config = configuration(Arc::default(), Duration::from_secs(3600), ExtensionSnapshot::default());
        config.overlay().put("inline", "first");
        assert_eq!(config.render("inline", &empty()).unwrap(), "first");

        config.overlay().put("inline", "second");
        assert_eq!(config.render("inline", &empty()).unwrap(), "first");
        config.evict("inline");
        assert_eq!(config.render("inline", &empty()).unwrap(), "second");
    }

    #[test]
    fn test_freshness_check_covers_own_entry_only() {
        let primary = Arc::new(VersionedSource::default());
        for n in 0..200 {
            primary.set(&format!("p{n}"), &format!("page {n}"), 1);
        }
        let config = configuration(primary.clone(), Duration::ZERO, ExtensionSnapshot::default());
        for n in 0..200 {
            config.render(&format!("p{n}"), &empty()).unwrap();
        }

        primary.checks.store(0, Ordering::Relaxed);
        assert_eq!(config.render("p0", &empty()).unwrap(), "page 0");
        assert_eq!(primary.checks.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_freshness_check_includes_referenced_templates() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("part", "part", 1);
        primary.set("page", "[{% include 'part' %}]", 1);
        primary.set("other", "other", 1);
        let config = configuration(primary.clone(), Duration::ZERO, ExtensionSnapshot::default());
        config.render("page", &empty()).unwrap();
        config.render("other", &empty()).unwrap();

        primary.checks.store(0, Ordering::Relaxed);
        config.render("page", &empty()).unwrap();
        assert_eq!(primary.checks.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_store_inline_if_absent_keeps_existing() {
        let config = configuration(Arc::default(), Duration::from_secs(3600), ExtensionSnapshot::default());

        assert!(config.store_inline("banner", "first", Refresh::IfAbsent, false));
        assert_eq!(config.render("banner", &empty()).unwrap(), "first");

        assert!(!config.store_inline("banner", "second", Refresh::IfAbsent, false));
        assert_eq!(config.render("banner", &empty()).unwrap(), "first");
        assert_eq!(config.compilations(), 1);

        assert!(config.store_inline("banner", "second", Refresh::Force, false));
        assert_eq!(config.render("banner", &empty()).unwrap(), "second");
        assert_eq!(config.compilations(), 2);
    }

    #[test]
    fn test_store_inline_content_keyed_replaces_differing_text() {
        let config = configuration(Arc::default(), Duration::from_secs(3600), ExtensionSnapshot::default());

        assert!(config.store_inline("k", "one", Refresh::IfAbsent, true));
        assert!(!config.store_inline("k", "one", Refresh::IfAbsent, true));
        assert!(config.store_inline("k", "two", Refresh::IfAbsent, true));
        assert_eq!(config.render("k", &empty()).unwrap(), "two");
    }

    #[test]
    fn test_syntax_error_is_template_error() {
        let primary = Arc::new(VersionedSource::default());
        primary.set("broken", "{% if %}", 1);
        let config = configuration(primary, Duration::ZERO, ExtensionSnapshot::default());

        let err = config.render("broken", &empty()).unwrap_err();
        assert!(err.is_template_error());
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
    }
}
