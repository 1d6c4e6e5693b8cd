//! MiniJinja environment setup for a configuration.
//!
//! Each configuration owns one environment. Its template store is the render
//! cache: composed entry templates are added explicitly under an
//! [`ENTRY_PREFIX`] name, while everything an entry pulls in through
//! `include`, `import` or `extends` is loaded on demand through the
//! [`SourceResolver`].

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::{AutoEscape, Environment, Error, ErrorKind, Value};
use tracing::debug;

use crate::cache::RenderCache;
use crate::format::{register_filters, DATE_FORMAT_KEY};
use crate::source::SourceResolver;

/// Prefix of composed entry templates in the environment.
///
/// The loader never serves these names, so templates cannot include an
/// entry by accident.
pub const ENTRY_PREFIX: &str = "@entry/";

/// Environment name of the composed entry for `name`.
pub fn entry_key(name: &str) -> String {
    format!("{ENTRY_PREFIX}{name}")
}

/// Creates an environment bound to `sources`.
///
/// Shared variables and the build-time date pattern become globals; the
/// render context can still shadow them.
pub fn build_environment(
    sources: Arc<SourceResolver>,
    cache: Arc<RenderCache>,
    date_pattern: &str,
    shared_variables: &BTreeMap<String, serde_json::Value>,
) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    // Output is text; escaping stays the caller's concern.
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_loader(move |name| load(&sources, &cache, name));

    env.add_global(DATE_FORMAT_KEY, date_pattern.to_string());
    for (name, value) in shared_variables {
        env.add_global(name.clone(), Value::from_serialize(value));
    }
    register_filters(&mut env);
    env
}

fn load(sources: &SourceResolver, cache: &RenderCache, name: &str) -> Result<Option<String>, Error> {
    if name.starts_with(ENTRY_PREFIX) {
        return Ok(None);
    }
    match sources.resolve(name) {
        Ok(Some(found)) => {
            debug!(template = name, "compiling referenced template");
            cache.record_reference(name, found.last_modified);
            cache.record_compilation();
            Ok(Some(found.content))
        }
        Ok(None) => Ok(None),
        Err(err) => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("could not read template `{name}`"),
        )
        .with_source(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StringSource;
    use std::time::Duration;

    fn environment_with(templates: &[(&str, &str)]) -> (Environment<'static>, Arc<RenderCache>) {
        let primary = Arc::new(StringSource::new());
        for (name, body) in templates {
            primary.put(*name, *body);
        }
        let sources = Arc::new(SourceResolver::new(primary));
        let cache = Arc::new(RenderCache::new(Duration::from_secs(60)));
        let mut shared = BTreeMap::new();
        shared.insert("site".to_string(), serde_json::json!("Portal"));
        let env = build_environment(sources, cache.clone(), "%d/%m/%Y", &shared);
        (env, cache)
    }

    #[test]
    fn test_loader_serves_sources_and_counts() {
        let (env, cache) = environment_with(&[("greeting.html", "Hello {{ site }}")]);

        let out = env
            .get_template("greeting.html")
            .unwrap()
            .render(minijinja::context! {})
            .unwrap();
        assert_eq!(out, "Hello Portal");
        assert_eq!(cache.compilations(), 1);

        env.get_template("greeting.html").unwrap();
        assert_eq!(cache.compilations(), 1);
    }

    #[test]
    fn test_loader_never_serves_entries() {
        let (env, _) = environment_with(&[]);
        let err = env.get_template(&entry_key("page")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    }

    #[test]
    fn test_no_html_escaping() {
        let (env, _) = environment_with(&[("page.html", "{{ markup }}")]);
        let out = env
            .get_template("page.html")
            .unwrap()
            .render(minijinja::context! { markup => "<b>x</b>" })
            .unwrap();
        assert_eq!(out, "<b>x</b>");
    }

    #[test]
    fn test_build_time_date_pattern_is_global() {
        let (env, _) = environment_with(&[("d.html", "{{ day | date }}")]);
        let out = env
            .get_template("d.html")
            .unwrap()
            .render(minijinja::context! { day => "2024-02-01" })
            .unwrap();
        assert_eq!(out, "01/02/2024");
    }
}
