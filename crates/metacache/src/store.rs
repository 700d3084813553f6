//! Snapshot store guarded by a single mutex.
//!
//! The lock only ever covers an `Arc` clone or swap. Rebuilds produce a whole
//! new [`EntryMap`] off to the side and install it with [`MetadataStore::replace_all`],
//! so readers see either the previous snapshot or the new one, never a mix.

use std::sync::Arc;

use fnv::FnvHashMap;
use parking_lot::Mutex;

use crate::entry::EntryMetadata;
use crate::error::{CacheError, Result};
use crate::path::{normalize_key, parent_key, ROOT_KEY};

/// Mapping from normalized key to entry metadata.
pub type EntryMap = FnvHashMap<String, EntryMetadata>;

/// An immutable, internally consistent view of the cache.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Arc<EntryMap>,
    generation: u64,
}

impl Snapshot {
    /// Looks up `path` after normalizing it.
    pub fn get(&self, path: &str) -> Option<&EntryMetadata> {
        self.entries.get(&normalize_key(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Number of completed installs that led to this snapshot. Zero before the first build.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &EntryMap {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntryMetadata)> {
        self.entries.iter()
    }

    /// Immediate children of the directory at `dir`, sorted by name.
    ///
    /// Fails with `NotFound` if `dir` is not a cached directory. The root is
    /// always listable.
    pub fn children(&self, dir: &str) -> Result<Vec<&EntryMetadata>> {
        let dir = normalize_key(dir);
        if dir != ROOT_KEY {
            match self.entries.get(&dir) {
                Some(entry) if entry.is_dir => {}
                _ => return Err(CacheError::NotFound(dir)),
            }
        }

        let mut children: Vec<&EntryMetadata> = self
            .entries
            .values()
            .filter(|entry| parent_key(&entry.path) == Some(dir.as_str()))
            .collect();
        children.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }
}

/// Owner of the current snapshot.
#[derive(Debug, Default)]
pub struct MetadataStore {
    current: Mutex<Snapshot>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `entries` as the authoritative snapshot and returns its generation.
    pub fn replace_all(&self, entries: EntryMap) -> u64 {
        let entries = Arc::new(entries);
        let mut current = self.current.lock();
        let generation = current.generation + 1;
        let previous = std::mem::replace(
            &mut *current,
            Snapshot {
                entries,
                generation,
            },
        );
        drop(current);
        // The old map is freed outside the lock.
        drop(previous);
        generation
    }

    /// Metadata for `path` as of the last completed install.
    pub fn get(&self, path: &str) -> Result<EntryMetadata> {
        let snapshot = self.snapshot();
        snapshot
            .get(path)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(normalize_key(path)))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.current.lock().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.lock().generation
    }

    pub fn len(&self) -> usize {
        self.current.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.lock().is_empty()
    }
}
