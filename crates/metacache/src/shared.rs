//! State shared between the cache handle and its watch thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::path::RootDir;
use crate::state::{unix_now_secs, zero_to_none, CacheCounters, CacheStats, WatchState};
use crate::store::MetadataStore;
use crate::walker;

#[derive(Debug)]
pub struct CacheShared {
    /// Canonical root being mirrored.
    pub root: RootDir,
    pub store: MetadataStore,
    /// Current [`WatchState`] (atomic for lock-free reads).
    pub state: AtomicU8,
    pub counters: CacheCounters,
    /// Serializes rebuilds so at most one walk is in flight.
    rebuild_lane: Mutex<()>,
    /// Receivers of installed generation numbers.
    listeners: Mutex<Vec<Sender<u64>>>,
}

impl CacheShared {
    pub fn new(root: RootDir) -> Self {
        Self {
            root,
            store: MetadataStore::new(),
            state: AtomicU8::new(WatchState::Initializing as u8),
            counters: CacheCounters::default(),
            rebuild_lane: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> WatchState {
        WatchState::load(&self.state)
    }

    pub fn set_state(&self, state: WatchState) {
        state.store(&self.state);
    }

    /// Moves `from` to `to`; false if the state was something else.
    fn transition(&self, from: WatchState, to: WatchState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Walks the tree and installs the result. Returns the new generation.
    ///
    /// A watching cache reports `Rebuilding` for the duration of the walk.
    /// On failure the previous snapshot stays installed.
    pub fn rebuild(&self, cancel: &CancellationToken) -> Result<u64> {
        let _lane = self.rebuild_lane.lock();
        let started = Instant::now();

        let entered = self.transition(WatchState::Watching, WatchState::Rebuilding);
        let walked = walker::rebuild(&self.root, cancel);
        if entered {
            self.transition(WatchState::Rebuilding, WatchState::Watching);
        }
        let entries = walked?;
        let count = entries.len();
        let generation = self.store.replace_all(entries);

        self.counters.rebuilds.fetch_add(1, Ordering::Relaxed);
        self.counters
            .last_rebuild_at
            .store(unix_now_secs(), Ordering::Relaxed);

        log::info!(
            "metadata cache rebuilt root={} generation={} entries={} elapsed_ms={}",
            self.root.path().display(),
            generation,
            count,
            started.elapsed().as_millis(),
        );

        self.listeners
            .lock()
            .retain(|listener| listener.send(generation).is_ok());
        Ok(generation)
    }

    /// Returns a receiver of every generation installed from now on.
    pub fn subscribe(&self) -> Receiver<u64> {
        let (tx, rx) = unbounded();
        self.listeners.lock().push(tx);
        rx
    }

    pub fn record_error(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let snapshot = self.store.snapshot();
        CacheStats {
            state: self.state(),
            entries: snapshot.len(),
            generation: snapshot.generation(),
            events_handled: self.counters.events_handled.load(Ordering::Relaxed),
            rebuilds: self.counters.rebuilds.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            last_rebuild_at: zero_to_none(self.counters.last_rebuild_at.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn rebuild_installs_and_notifies() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("a.txt")).unwrap();
        let shared = CacheShared::new(RootDir::new(temp.path()).unwrap());
        let generations = shared.subscribe();

        let generation = shared.rebuild(&CancellationToken::new()).unwrap();

        assert_eq!(generation, 1);
        assert_eq!(generations.try_recv().unwrap(), 1);
        assert!(shared.store.get("/a.txt").is_ok());

        let stats = shared.stats();
        assert_eq!(stats.rebuilds, 1);
        assert_eq!(stats.entries, 1);
        assert!(stats.last_rebuild_at.is_some());
    }

    #[test]
    fn failed_rebuild_keeps_previous_snapshot() {
        let temp = TempDir::new().unwrap();
        let root_dir = temp.path().join("root");
        std::fs::create_dir(&root_dir).unwrap();
        File::create(root_dir.join("a.txt")).unwrap();
        let shared = CacheShared::new(RootDir::new(&root_dir).unwrap());
        shared.rebuild(&CancellationToken::new()).unwrap();

        std::fs::remove_dir_all(&root_dir).unwrap();
        assert!(shared.rebuild(&CancellationToken::new()).is_err());

        assert_eq!(shared.store.generation(), 1);
        assert!(shared.store.get("/a.txt").is_ok());
        assert_eq!(shared.stats().rebuilds, 1);
    }

    #[test]
    fn rebuild_reports_rebuilding_while_walking() {
        let temp = TempDir::new().unwrap();
        for dir in 0..20 {
            let dir = temp.path().join(format!("dir{dir}"));
            std::fs::create_dir(&dir).unwrap();
            for file in 0..20 {
                File::create(dir.join(format!("f{file}.txt"))).unwrap();
            }
        }
        let shared = std::sync::Arc::new(CacheShared::new(RootDir::new(temp.path()).unwrap()));
        shared.set_state(WatchState::Watching);

        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let worker = {
            let shared = shared.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    shared.rebuild(&CancellationToken::new()).unwrap();
                }
            })
        };

        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        while shared.state() != WatchState::Rebuilding {
            assert!(Instant::now() < deadline, "never observed Rebuilding");
            std::thread::yield_now();
        }
        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();

        assert_eq!(shared.state(), WatchState::Watching);
    }

    #[test]
    fn rebuild_leaves_other_states_alone() {
        let temp = TempDir::new().unwrap();
        let shared = CacheShared::new(RootDir::new(temp.path()).unwrap());

        shared.rebuild(&CancellationToken::new()).unwrap();
        assert_eq!(shared.state(), WatchState::Initializing);

        shared.set_state(WatchState::Stopped);
        shared.rebuild(&CancellationToken::new()).unwrap();
        assert_eq!(shared.state(), WatchState::Stopped);
    }

    #[test]
    fn failed_rebuild_returns_to_watching() {
        let temp = TempDir::new().unwrap();
        let root_dir = temp.path().join("root");
        std::fs::create_dir(&root_dir).unwrap();
        let shared = CacheShared::new(RootDir::new(&root_dir).unwrap());
        shared.set_state(WatchState::Watching);

        std::fs::remove_dir_all(&root_dir).unwrap();
        assert!(shared.rebuild(&CancellationToken::new()).is_err());
        assert_eq!(shared.state(), WatchState::Watching);
    }

    #[test]
    fn dropped_listeners_are_pruned() {
        let temp = TempDir::new().unwrap();
        let shared = CacheShared::new(RootDir::new(temp.path()).unwrap());
        drop(shared.subscribe());
        let kept = shared.subscribe();

        shared.rebuild(&CancellationToken::new()).unwrap();

        assert_eq!(shared.listeners.lock().len(), 1);
        assert_eq!(kept.try_recv().unwrap(), 1);
    }
}
