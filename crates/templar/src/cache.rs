//! Bookkeeping for compiled templates.
//!
//! The compiled templates themselves live inside each configuration's
//! `minijinja::Environment`. This module tracks what the environment cannot:
//!
//! - when each source template was last read and what its last-modified time
//!   was, so stale templates can be detected once the update delay elapses;
//! - which composed entry templates depend on which sources, so a changed
//!   source evicts every entry that spliced it in, and a render only
//!   re-checks the sources behind its own entry;
//! - how many compilations have happened, for observability.
//!
//! All entry mutations happen while the owning configuration holds its
//! environment write lock, so the entry map and the environment never
//! disagree about what is compiled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Stamp {
    last_modified: Option<SystemTime>,
    checked_at: Instant,
    // Loaded by the engine through include, import or extends.
    referenced: bool,
}

/// Per-configuration render cache metadata.
#[derive(Debug)]
pub struct RenderCache {
    update_delay: Duration,
    stamps: Mutex<HashMap<String, Stamp>>,
    entries: Mutex<HashMap<String, Vec<String>>>,
    compilations: AtomicUsize,
}

impl RenderCache {
    /// Create an empty cache that re-checks sources after `update_delay`.
    pub fn new(update_delay: Duration) -> Self {
        Self {
            update_delay,
            stamps: Mutex::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
            compilations: AtomicUsize::new(0),
        }
    }

    /// How long a source is trusted before it is re-checked.
    pub fn update_delay(&self) -> Duration {
        self.update_delay
    }

    /// Remember that `name` was read with the given last-modified time
    /// while composing an entry.
    pub fn record_load(&self, name: &str, last_modified: Option<SystemTime>) {
        self.stamp(name, last_modified, false);
    }

    /// Remember that the engine loaded `name` on demand.
    ///
    /// Referenced templates are shared by every entry that reaches them, so
    /// they are re-checked on every render once their delay elapses.
    pub fn record_reference(&self, name: &str, last_modified: Option<SystemTime>) {
        self.stamp(name, last_modified, true);
    }

    fn stamp(&self, name: &str, last_modified: Option<SystemTime>, referenced: bool) {
        let mut stamps = self.stamps.lock();
        let referenced = referenced || stamps.get(name).is_some_and(|stamp| stamp.referenced);
        stamps.insert(
            name.to_string(),
            Stamp {
                last_modified,
                checked_at: Instant::now(),
                referenced,
            },
        );
    }

    /// Count one compilation of a template loaded on demand by the engine.
    pub fn record_compilation(&self) {
        self.compilations.fetch_add(1, Ordering::Relaxed);
    }

    /// Register a composed entry template and the sources spliced into it.
    pub fn record_entry(&self, entry: &str, dependencies: Vec<String>) {
        self.entries.lock().insert(entry.to_string(), dependencies);
        self.record_compilation();
    }

    /// Whether a composed entry template is currently compiled.
    pub fn has_entry(&self, entry: &str) -> bool {
        self.entries.lock().contains_key(entry)
    }

    /// Sources behind `entry` whose update delay has elapsed, with their
    /// recorded last-modified time.
    ///
    /// Only the entry's spliced sources and the referenced templates are
    /// considered; sources of other entries are left alone.
    pub fn due_for_check(&self, entry: &str, now: Instant) -> Vec<(String, Option<SystemTime>)> {
        let dependencies = self.entries.lock().get(entry).cloned().unwrap_or_default();
        let stamps = self.stamps.lock();
        let is_due = |stamp: &Stamp| now.saturating_duration_since(stamp.checked_at) >= self.update_delay;

        let mut due: Vec<(String, Option<SystemTime>)> = dependencies
            .into_iter()
            .filter_map(|name| {
                let stamp = stamps.get(&name)?;
                (!stamp.referenced && is_due(stamp)).then(|| (name, stamp.last_modified))
            })
            .collect();
        due.extend(
            stamps
                .iter()
                .filter(|(_, stamp)| stamp.referenced && is_due(stamp))
                .map(|(name, stamp)| (name.clone(), stamp.last_modified)),
        );
        due
    }

    /// Restart the update delay window for `name` after a check found it
    /// unchanged.
    pub fn confirm_fresh(&self, name: &str) {
        if let Some(stamp) = self.stamps.lock().get_mut(name) {
            stamp.checked_at = Instant::now();
        }
    }

    /// Forget `name` and every entry that depends on it.
    ///
    /// Returns the evicted entry names so the caller can drop them from the
    /// environment.
    pub fn invalidate(&self, name: &str) -> Vec<String> {
        self.stamps.lock().remove(name);
        let mut entries = self.entries.lock();
        let evicted: Vec<String> = entries
            .iter()
            .filter(|(_, deps)| deps.iter().any(|dep| dep == name))
            .map(|(entry, _)| entry.clone())
            .collect();
        for entry in &evicted {
            entries.remove(entry);
        }
        evicted
    }

    /// Remove every composed entry, returning their names.
    pub fn take_entries(&self) -> Vec<String> {
        self.entries.lock().drain().map(|(entry, _)| entry).collect()
    }

    /// Forget everything except the compilation counter.
    pub fn clear(&self) {
        self.stamps.lock().clear();
        self.entries.lock().clear();
    }

    /// Total number of compilations since the configuration was built.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Number of composed entries currently compiled.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entries are compiled.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
