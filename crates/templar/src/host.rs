//! Collaborators supplied by the host application.
//!
//! The service never decides on its own where a relative root lives on disk
//! or how a locale formats dates. Those answers come from the host through
//! the traits in this module:
//!
//! - [`PathResolver`]: maps a configured relative root to an absolute path.
//! - [`DatePatternProvider`]: maps a [`Locale`] to a date pattern.
//! - [`HostContext`]: an optional deployment-aware loader that takes
//!   precedence over plain filesystem lookup when present.
//!
//! Closures implement the first two traits directly, so simple hosts can
//! pass a function instead of a dedicated type.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::source::{FileSource, ResolvedSource, TemplateSource};

/// A locale tag such as `fr_FR` or `en-US`.
///
/// Tags are kept as given; [`language`](Self::language) and
/// [`country`](Self::country) accept both `_` and `-` separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale(String);

impl Locale {
    /// Create a locale from a tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The tag as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased language part (`fr` for `fr_FR`).
    pub fn language(&self) -> String {
        self.0
            .split(['_', '-'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    /// Uppercased country part, if any (`FR` for `fr_FR`).
    pub fn country(&self) -> Option<String> {
        self.0
            .split(['_', '-'])
            .nth(1)
            .filter(|part| !part.is_empty())
            .map(|part| part.to_ascii_uppercase())
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::new("en_US")
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locale {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Maps a configured root path to an absolute filesystem path.
pub trait PathResolver: Send + Sync {
    /// Resolve `relative` to an absolute path.
    fn absolute_path(&self, relative: &str) -> PathBuf;
}

impl<F> PathResolver for F
where
    F: Fn(&str) -> PathBuf + Send + Sync,
{
    fn absolute_path(&self, relative: &str) -> PathBuf {
        (self)(relative)
    }
}

/// Resolves roots against the process working directory.
///
/// Absolute roots are returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkingDirResolver;

impl PathResolver for WorkingDirResolver {
    fn absolute_path(&self, relative: &str) -> PathBuf {
        let path = Path::new(relative);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    }
}

/// Supplies the date pattern for a locale.
///
/// Patterns use `strftime` syntax as understood by `chrono`
/// (for example `%d/%m/%Y`).
pub trait DatePatternProvider: Send + Sync {
    /// The default date pattern for `locale`.
    fn default_pattern(&self, locale: &Locale) -> String;
}

impl<F> DatePatternProvider for F
where
    F: Fn(&Locale) -> String + Send + Sync,
{
    fn default_pattern(&self, locale: &Locale) -> String {
        (self)(locale)
    }
}

/// A small built-in table of common date patterns.
///
/// Unknown locales fall back to ISO 8601 (`%Y-%m-%d`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDatePatterns;

impl DatePatternProvider for StandardDatePatterns {
    fn default_pattern(&self, locale: &Locale) -> String {
        let pattern = match (locale.language().as_str(), locale.country().as_deref()) {
            ("en", Some("US")) => "%m/%d/%Y",
            ("en", _) => "%d/%m/%Y",
            ("fr" | "es" | "it" | "pt", _) => "%d/%m/%Y",
            ("de" | "ru" | "pl", _) => "%d.%m.%Y",
            ("nl", _) => "%d-%m-%Y",
            ("ja" | "zh" | "ko", _) => "%Y/%m/%d",
            _ => "%Y-%m-%d",
        };
        pattern.to_string()
    }
}

/// A deployment-aware template loader.
///
/// When the service is initialised with a host context, configurations load
/// their primary templates through it instead of a bare directory.
pub trait HostContext: Send + Sync {
    /// Check that `root` can serve templates.
    ///
    /// An error here fails the configuration build.
    fn check_root(&self, root: &str) -> io::Result<()>;

    /// Load `name` relative to `root`.
    fn load(&self, root: &str, name: &str) -> io::Result<Option<ResolvedSource>>;

    /// Last-modified time of `name` relative to `root`, without its content.
    ///
    /// Follows [`TemplateSource::last_modified`]: `None` when the template
    /// does not exist. The default loads the template; contexts that can
    /// stat cheaply should override it.
    fn last_modified(&self, root: &str, name: &str) -> io::Result<Option<Option<SystemTime>>> {
        Ok(self.load(root, name)?.map(|source| source.last_modified))
    }
}

/// A host context rooted at a deployed application directory.
///
/// Template roots are interpreted relative to the deployment directory
/// rather than the process working directory. Each root is validated once
/// and its [`FileSource`] reused for every later load.
#[derive(Debug)]
pub struct DeploymentContext {
    base: PathBuf,
    roots: RwLock<HashMap<String, FileSource>>,
}

impl DeploymentContext {
    /// Create a context for the application deployed at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            roots: RwLock::new(HashMap::new()),
        }
    }

    /// The deployment directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Roots validated so far.
    pub fn checked_roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = self.roots.read().keys().cloned().collect();
        roots.sort();
        roots
    }

    fn source_for(&self, root: &str) -> io::Result<FileSource> {
        if let Some(source) = self.roots.read().get(root) {
            return Ok(source.clone());
        }
        let source = FileSource::new(self.base.join(root.trim_start_matches('/')))?;
        self.roots
            .write()
            .entry(root.to_string())
            .or_insert_with(|| source.clone());
        Ok(source)
    }
}

impl HostContext for DeploymentContext {
    fn check_root(&self, root: &str) -> io::Result<()> {
        self.source_for(root).map(|_| ())
    }

    fn load(&self, root: &str, name: &str) -> io::Result<Option<ResolvedSource>> {
        self.source_for(root)?.try_resolve(name)
    }

    fn last_modified(&self, root: &str, name: &str) -> io::Result<Option<Option<SystemTime>>> {
        self.source_for(root)?.last_modified(name)
    }
}
