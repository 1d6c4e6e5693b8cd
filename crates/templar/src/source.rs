//! Template sources and the ordered resolver that combines them.
//!
//! Every [`Configuration`](crate::Configuration) owns one [`SourceResolver`]
//! made of two backends tried in order:
//!
//! 1. The primary backend: a [`FileSource`] rooted at the configuration's
//!    root path, or a [`HostContextSource`] when the service was initialised
//!    with a [`HostContext`].
//! 2. The overlay: a [`StringSource`] holding literal template text in
//!    memory. Anonymous templates are only ever written here.
//!
//! A name in the overlay therefore never shadows a template the primary
//! backend can serve.
//!
//! # Resolution
//!
//! ```text
//! resolve("page.html")
//!     │
//!     ├── primary.try_resolve ── Some ──► content + last-modified
//!     │        │
//!     │       None
//!     │        ▼
//!     └── overlay.try_resolve ── Some ──► content + stored-at
//!              │
//!             None ──► not found
//! ```
//!
//! Each backend also reports a last-modified time so the render cache can
//! tell whether a compiled template is stale.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::host::HostContext;

/// Template text returned by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    /// The template text.
    pub content: String,
    /// When the source last changed, if the backend knows.
    pub last_modified: Option<SystemTime>,
}

impl ResolvedSource {
    /// Create a resolved source.
    pub fn new(content: impl Into<String>, last_modified: Option<SystemTime>) -> Self {
        Self {
            content: content.into(),
            last_modified,
        }
    }
}

/// A backend that can look up templates by name.
pub trait TemplateSource: Send + Sync {
    /// Look up `name`. `Ok(None)` means this backend has no such template.
    fn try_resolve(&self, name: &str) -> io::Result<Option<ResolvedSource>>;

    /// Last-modified time of `name` without necessarily reading its content.
    ///
    /// `Ok(None)` means the template does not exist here.
    fn last_modified(&self, name: &str) -> io::Result<Option<Option<SystemTime>>> {
        Ok(self.try_resolve(name)?.map(|source| source.last_modified))
    }

    /// Short human readable description used in logs.
    fn describe(&self) -> String;
}

/// Templates read from a directory on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    /// Root a file source at `root`.
    ///
    /// # Errors
    ///
    /// Fails if `root` does not exist, cannot be read, or is not a directory.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let metadata = std::fs::metadata(&root)?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("template root is not a directory: {}", root.display()),
            ));
        }
        // Listing proves the directory is readable.
        std::fs::read_dir(&root)?;
        Ok(Self { root })
    }

    /// The directory templates are read from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a template name to a path under the root.
    ///
    /// Names that would escape the root (`..`, absolute prefixes) map to
    /// nothing.
    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    warn!(template = name, "rejecting template name outside the root");
                    return None;
                }
            }
        }
        Some(path)
    }
}

impl TemplateSource for FileSource {
    fn try_resolve(&self, name: &str) -> io::Result<Option<ResolvedSource>> {
        let Some(path) = self.path_for(name) else {
            return Ok(None);
        };
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let content = std::fs::read_to_string(&path)?;
        trace!(path = %path.display(), "read template file");
        Ok(Some(ResolvedSource::new(content, metadata.modified().ok())))
    }

    fn last_modified(&self, name: &str) -> io::Result<Option<Option<SystemTime>>> {
        let Some(path) = self.path_for(name) else {
            return Ok(None);
        };
        match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.modified().ok())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.root.display())
    }
}

/// Templates served through the host's deployment-aware loader.
pub struct HostContextSource {
    context: Arc<dyn HostContext>,
    root: String,
}

impl HostContextSource {
    /// Bind `context` to `root`.
    ///
    /// # Errors
    ///
    /// Fails if the host context rejects the root.
    pub fn new(context: Arc<dyn HostContext>, root: impl Into<String>) -> io::Result<Self> {
        let root = root.into();
        context.check_root(&root)?;
        Ok(Self { context, root })
    }
}

impl fmt::Debug for HostContextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContextSource")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl TemplateSource for HostContextSource {
    fn try_resolve(&self, name: &str) -> io::Result<Option<ResolvedSource>> {
        self.context.load(&self.root, name)
    }

    fn last_modified(&self, name: &str) -> io::Result<Option<Option<SystemTime>>> {
        self.context.last_modified(&self.root, name)
    }

    fn describe(&self) -> String {
        format!("host:{}", self.root)
    }
}

#[derive(Debug, Clone)]
struct StringEntry {
    content: String,
    stored_at: SystemTime,
}

/// In-memory template text, mutable at any time.
#[derive(Debug, Default)]
pub struct StringSource {
    entries: RwLock<HashMap<String, StringEntry>>,
}

impl StringSource {
    /// Create an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` under `name`, replacing any previous entry.
    pub fn put(&self, name: impl Into<String>, content: impl Into<String>) {
        let name = name.into();
        trace!(template = %name, "storing template text in overlay");
        self.entries.write().insert(
            name,
            StringEntry {
                content: content.into(),
                stored_at: SystemTime::now(),
            },
        );
    }

    /// The stored text for `name`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.entries
            .read()
            .get(name)
            .map(|entry| entry.content.clone())
    }

    /// Whether an entry exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Remove the entry for `name`, returning its text.
    pub fn remove(&self, name: &str) -> Option<String> {
        self.entries.write().remove(name).map(|entry| entry.content)
    }

    /// Names of all stored entries, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the overlay is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl TemplateSource for StringSource {
    fn try_resolve(&self, name: &str) -> io::Result<Option<ResolvedSource>> {
        Ok(self
            .entries
            .read()
            .get(name)
            .map(|entry| ResolvedSource::new(entry.content.clone(), Some(entry.stored_at))))
    }

    fn last_modified(&self, name: &str) -> io::Result<Option<Option<SystemTime>>> {
        Ok(self
            .entries
            .read()
            .get(name)
            .map(|entry| Some(entry.stored_at)))
    }

    fn describe(&self) -> String {
        "overlay".to_string()
    }
}

/// Ordered list of template sources bound to one configuration.
pub struct SourceResolver {
    sources: Vec<Arc<dyn TemplateSource>>,
    overlay: Arc<StringSource>,
}

impl SourceResolver {
    /// Build a resolver that tries `primary` first and then a fresh, empty
    /// overlay.
    pub fn new(primary: Arc<dyn TemplateSource>) -> Self {
        let overlay = Arc::new(StringSource::new());
        let fallback: Arc<dyn TemplateSource> = overlay.clone();
        Self {
            sources: vec![primary, fallback],
            overlay,
        }
    }

    /// The in-memory overlay.
    pub fn overlay(&self) -> &Arc<StringSource> {
        &self.overlay
    }

    /// Try every source in order and return the first hit.
    pub fn resolve(&self, name: &str) -> io::Result<Option<ResolvedSource>> {
        for source in &self.sources {
            if let Some(found) = source.try_resolve(name)? {
                trace!(template = name, source = %source.describe(), "resolved template");
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Last-modified time of `name` from the first source that has it.
    pub fn last_modified(&self, name: &str) -> io::Result<Option<Option<SystemTime>>> {
        for source in &self.sources {
            if let Some(modified) = source.last_modified(name)? {
                return Ok(Some(modified));
            }
        }
        Ok(None)
    }

    /// Descriptions of the sources in lookup order.
    pub fn describe(&self) -> Vec<String> {
        self.sources.iter().map(|source| source.describe()).collect()
    }
}

impl fmt::Debug for SourceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceResolver")
            .field("sources", &self.describe())
            .finish()
    }
}
