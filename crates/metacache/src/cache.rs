//! `MetadataCache` - lifecycle and query API.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver};
use notify::RecommendedWatcher;

use crate::cancel::CancellationToken;
use crate::config::CacheConfig;
use crate::entry::EntryMetadata;
use crate::error::{CacheError, Result};
use crate::event::ChangeMask;
use crate::path::RootDir;
use crate::shared::CacheShared;
use crate::state::{CacheStats, WatchState};
use crate::store::Snapshot;
use crate::watch::{create_watcher, EventReceiver, WatchLoop};

/// In-memory mirror of the metadata under one root directory.
///
/// Created fully populated by [`MetadataCache::start`]; kept current by a
/// background watch thread until [`MetadataCache::stop`] or drop.
pub struct MetadataCache {
    shared: Arc<CacheShared>,
    cancel: CancellationToken,
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("shared", &self.shared)
            .field("watcher", &self.watcher.as_ref().map(|_| "<watcher>"))
            .finish()
    }
}

impl MetadataCache {
    /// Builds the cache and starts watching the root with the platform's
    /// recommended notify backend.
    ///
    /// The subscription is registered before the initial walk so changes made
    /// during the walk are queued rather than lost. Walk or subscription
    /// failures abort startup.
    pub fn start(config: CacheConfig) -> Result<Self> {
        let root = RootDir::new(&config.root)?;
        let rebuild_on = config.rebuild_mask()?;
        let (event_tx, event_rx) = unbounded();
        let watcher = create_watcher(&root, config.recursive, event_tx)?;
        Self::launch(root, rebuild_on, event_rx, Some(watcher))
    }

    /// Builds the cache and consumes events from a caller-owned source.
    ///
    /// The watch loop stops when every sender is dropped or on [`stop`](Self::stop).
    pub fn start_with_events(config: CacheConfig, events: EventReceiver) -> Result<Self> {
        let root = RootDir::new(&config.root)?;
        let rebuild_on = config.rebuild_mask()?;
        Self::launch(root, rebuild_on, events, None)
    }

    fn launch(
        root: RootDir,
        rebuild_on: ChangeMask,
        events: EventReceiver,
        watcher: Option<RecommendedWatcher>,
    ) -> Result<Self> {
        let init_started = Instant::now();
        let shared = Arc::new(CacheShared::new(root));
        let cancel = CancellationToken::new();

        let generation = shared.rebuild(&cancel)?;

        let worker = WatchLoop {
            shared: shared.clone(),
            events,
            cancel: cancel.clone(),
            rebuild_on,
        }
        .spawn()?;

        log::info!(
            "metadata cache init root={} entries={} generation={} watcher={} rebuild_on={:?} total_init_ms={}",
            shared.root.path().display(),
            shared.store.len(),
            generation,
            watcher.is_some(),
            rebuild_on,
            init_started.elapsed().as_millis(),
        );

        Ok(Self {
            shared,
            cancel,
            watcher,
            worker: Some(worker),
        })
    }

    /// Metadata for `path` as of the last completed rebuild.
    pub fn get(&self, path: &str) -> Result<EntryMetadata> {
        self.shared.store.get(path)
    }

    /// The whole current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.store.snapshot()
    }

    /// Immediate children of a cached directory, sorted by name.
    pub fn list_dir(&self, path: &str) -> Result<Vec<EntryMetadata>> {
        let snapshot = self.snapshot();
        let children = snapshot.children(path)?;
        Ok(children.into_iter().cloned().collect())
    }

    /// Maps a cache key to its absolute path.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        self.shared.root.resolve(path)
    }

    pub fn root(&self) -> &Path {
        self.shared.root.path()
    }

    /// Forces a full rebuild from the calling thread.
    ///
    /// Serialized with rebuilds started by the watch loop. On error the
    /// previous snapshot stays installed.
    pub fn rescan(&self) -> Result<u64> {
        self.shared.rebuild(&self.cancel).inspect_err(|error| {
            if !matches!(error, CacheError::Cancelled) {
                self.shared.record_error();
            }
        })
    }

    pub fn state(&self) -> WatchState {
        self.shared.state()
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.stats()
    }

    /// Receives the generation number of every snapshot installed from now on.
    pub fn subscribe_rebuilds(&self) -> Receiver<u64> {
        self.shared.subscribe()
    }

    /// Cancels the watch loop, releases the subscription and waits for the
    /// watch thread to exit. An in-progress rebuild is abandoned.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        drop(self.watcher.take());
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| CacheError::Internal("metadata watch thread panicked".to_string()))?;
        }
        self.shared.set_state(WatchState::Stopped);
        Ok(())
    }
}

impl Drop for MetadataCache {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            log::warn!("metadata cache shutdown failed: {error}");
        }
    }
}
