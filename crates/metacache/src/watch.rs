//! Change-watch loop and notify integration.
//!
//! The notify callback only translates events and pushes them into a channel.
//! A dedicated thread consumes the channel one batch at a time and rebuilds
//! the whole snapshot whenever a batch contains a qualifying change; no
//! incremental patching is attempted, since single-entry notifications do not
//! describe subtree moves reliably.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use notify::{recommended_watcher, RecommendedWatcher, RecursiveMode, Watcher};

use crate::cancel::CancellationToken;
use crate::error::{CacheError, Result};
use crate::event::{ChangeMask, WatcherEvent};
use crate::path::RootDir;
use crate::shared::CacheShared;
use crate::state::WatchState;

/// Sending half of a watch loop's event channel.
pub type EventSender = Sender<WatcherEvent>;
/// Receiving half of a watch loop's event channel.
pub type EventReceiver = Receiver<WatcherEvent>;

/// Creates a notify watcher on `root` that feeds `event_tx`.
pub fn create_watcher(
    root: &RootDir,
    recursive: bool,
    event_tx: EventSender,
) -> Result<RecommendedWatcher> {
    let mut watcher = recommended_watcher(move |event_result: notify::Result<notify::Event>| {
        if let Some(event) = WatcherEvent::from_notify(event_result) {
            let _ = event_tx.send(event);
        }
    })
    .map_err(|error| {
        CacheError::Subscription(format!(
            "failed to create filesystem watcher for {}: {error}",
            root.path().display()
        ))
    })?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(root.path(), mode).map_err(|error| {
        CacheError::Subscription(format!(
            "failed to watch {}: {error}",
            root.path().display()
        ))
    })?;

    Ok(watcher)
}

/// The consumer side of the event channel.
pub(crate) struct WatchLoop {
    pub shared: Arc<CacheShared>,
    pub events: EventReceiver,
    pub cancel: CancellationToken,
    pub rebuild_on: ChangeMask,
}

impl WatchLoop {
    /// Starts the loop thread and returns once it is in `Watching`.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let (ready_tx, ready_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("metacache-watch".to_string())
            .spawn(move || {
                self.shared.set_state(WatchState::Watching);
                let _ = ready_tx.send(());
                self.run()
            })
            .map_err(|error| {
                CacheError::Internal(format!("failed to spawn watch thread: {error}"))
            })?;

        ready_rx
            .recv()
            .map_err(|_| CacheError::Internal("watch thread exited during startup".to_string()))?;
        Ok(handle)
    }

    fn run(self) {
        loop {
            select! {
                recv(self.cancel.wake_receiver()) -> _ => break,
                recv(self.events) -> message => match message {
                    Ok(event) => self.handle_batch(event),
                    Err(_) => {
                        log::debug!(
                            "metadata watch event source closed root={}",
                            self.shared.root.path().display()
                        );
                        break;
                    }
                },
            }
            if self.cancel.is_cancelled() {
                break;
            }
        }

        self.shared.set_state(WatchState::Stopped);
        log::info!(
            "metadata watch stopped root={}",
            self.shared.root.path().display()
        );
    }

    /// Handles `first` plus the events queued behind it when the batch starts,
    /// with at most one rebuild. Later arrivals wait for the next batch.
    fn handle_batch(&self, first: WatcherEvent) {
        let queued_at_start = self.events.len();
        let mut handled = 1u64;
        let mut needs_rebuild = self.observe(first);
        for queued in self.events.try_iter().take(queued_at_start) {
            handled += 1;
            needs_rebuild |= self.observe(queued);
        }

        if needs_rebuild && !self.cancel.is_cancelled() {
            self.rebuild();
        }

        self.shared
            .counters
            .events_handled
            .fetch_add(handled, Ordering::Relaxed);
    }

    /// Returns true if the event calls for a rebuild.
    fn observe(&self, event: WatcherEvent) -> bool {
        if let WatcherEvent::Error(message) = &event {
            self.shared.record_error();
            log::warn!(
                "metadata watch error root={}: {}",
                self.shared.root.path().display(),
                message
            );
            return false;
        }

        let triggers = event.triggers_rebuild(&self.shared.root, self.rebuild_on);
        log::debug!("metadata watch event={event:?} rebuild={triggers}");
        triggers
    }

    fn rebuild(&self) {
        match self.shared.rebuild(&self.cancel) {
            Ok(_) => {}
            Err(CacheError::Cancelled) => {
                log::debug!("metadata rebuild cancelled");
            }
            Err(error) => {
                self.shared.record_error();
                log::warn!(
                    "metadata rebuild failed root={}, keeping generation {}: {}",
                    self.shared.root.path().display(),
                    self.shared.store.generation(),
                    error
                );
            }
        }
    }
}
