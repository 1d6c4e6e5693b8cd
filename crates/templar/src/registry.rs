//! Root path to configuration registry.
//!
//! The registry holds at most one [`Configuration`] per root path. Lookups
//! take a shared lock on the map; a miss serializes builders of the same path
//! on a per-path guard so that concurrent first requests build exactly once.
//! Building happens outside the map lock, so a slow filesystem never blocks
//! lookups of other roots.
//!
//! ```text
//! get_or_build("skin/")
//!     │
//!     ├── map hit ───────────────────────────────► Arc<Configuration>
//!     │
//!     └── miss ─► lock guard("skin/")
//!                   ├── map hit (another thread built it) ─► Arc
//!                   └── build ─► insert ─► Arc
//! ```
//!
//! A failed build leaves nothing behind; the next request tries again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::configuration::Configuration;
use crate::error::Result;

/// Cache of configurations keyed by root path.
#[derive(Debug, Default)]
pub struct ConfigurationRegistry {
    configurations: RwLock<HashMap<String, Arc<Configuration>>>,
    build_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    builds: AtomicUsize,
}

impl ConfigurationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached configuration for `path`, if any.
    pub fn get(&self, path: &str) -> Option<Arc<Configuration>> {
        self.configurations.read().get(path).cloned()
    }

    /// The cached configuration for `path`, building it with `build` if
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns whatever `build` returns. Nothing is cached on failure.
    pub fn get_or_build<F>(&self, path: &str, build: F) -> Result<Arc<Configuration>>
    where
        F: FnOnce() -> Result<Configuration>,
    {
        if let Some(found) = self.get(path) {
            return Ok(found);
        }

        let guard = self
            .build_guards
            .lock()
            .entry(path.to_string())
            .or_default()
            .clone();
        let _building = guard.lock();

        if let Some(found) = self.get(path) {
            return Ok(found);
        }

        let result = build();
        let configuration = match result {
            Ok(configuration) => Arc::new(configuration),
            Err(err) => {
                self.build_guards.lock().remove(path);
                return Err(err);
            }
        };

        let stored = self
            .configurations
            .write()
            .entry(path.to_string())
            .or_insert_with(|| configuration.clone())
            .clone();
        self.build_guards.lock().remove(path);
        if Arc::ptr_eq(&stored, &configuration) {
            self.builds.fetch_add(1, Ordering::Relaxed);
            info!(root = path, "cached template configuration");
        }
        Ok(stored)
    }

    /// Drop every cached configuration.
    ///
    /// Callers holding an `Arc<Configuration>` keep a working object; it is
    /// simply no longer reachable through the registry.
    pub fn invalidate_all(&self) {
        let dropped = {
            let mut configurations = self.configurations.write();
            let count = configurations.len();
            configurations.clear();
            count
        };
        info!(dropped, "invalidated template configurations");
    }

    /// Clear the render cache of every cached configuration.
    pub fn clear_render_caches(&self) {
        let configurations: Vec<Arc<Configuration>> =
            self.configurations.read().values().cloned().collect();
        for configuration in &configurations {
            configuration.clear_render_cache();
        }
        debug!(count = configurations.len(), "cleared render caches");
    }

    /// Number of successful builds since the registry was created.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Cached root paths, sorted.
    pub fn roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = self.configurations.read().keys().cloned().collect();
        roots.sort();
        roots
    }

    pub fn len(&self) -> usize {
        self.configurations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.read().is_empty()
    }
}
