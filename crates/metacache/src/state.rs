//! Watch loop state and counters.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle state of the change-watch loop.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum WatchState {
    Initializing = 0,
    Watching = 1,
    Rebuilding = 2,
    Stopped = 3,
}

impl WatchState {
    /// Loads the state from an atomic.
    pub fn load(atomic: &AtomicU8) -> Self {
        match atomic.load(Ordering::Acquire) {
            1 => Self::Watching,
            2 => Self::Rebuilding,
            3 => Self::Stopped,
            _ => Self::Initializing,
        }
    }

    pub fn store(self, atomic: &AtomicU8) {
        atomic.store(self as u8, Ordering::Release);
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Watching => "watching",
            Self::Rebuilding => "rebuilding",
            Self::Stopped => "stopped",
        }
    }
}

/// Counters updated by the watch thread and by explicit rescans.
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub events_handled: AtomicU64,
    pub rebuilds: AtomicU64,
    pub errors: AtomicU64,
    pub last_rebuild_at: AtomicU64,
}

/// Point-in-time view of the cache for hosts and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub state: WatchState,
    /// Entries in the current snapshot.
    pub entries: usize,
    /// Generation of the current snapshot.
    pub generation: u64,
    /// Events fully processed by the watch loop, including any rebuild they caused.
    pub events_handled: u64,
    /// Completed rebuilds, the initial build included.
    pub rebuilds: u64,
    /// Failed rebuilds plus error events from the notification source.
    pub errors: u64,
    /// Unix timestamp of the last completed rebuild.
    pub last_rebuild_at: Option<u64>,
}

/// Returns the current Unix timestamp in seconds.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}

/// Converts 0 to None for optional timestamps.
pub fn zero_to_none(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}
