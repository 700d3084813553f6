//! In-memory metadata mirror of a watched directory tree.
//!
//! This crate provides:
//! - A mutex-guarded snapshot store with atomic whole-map replacement
//! - A parallel recursive walker that rebuilds the snapshot from disk
//! - A notify-driven watch loop that rebuilds on structural changes

pub mod cache;
pub mod cancel;
pub mod config;
pub mod entry;
pub mod error;
pub mod event;
pub mod path;
pub mod state;
pub mod store;
pub mod walker;
pub mod watch;

mod shared;

// Re-export main types
pub use cache::MetadataCache;
pub use cancel::CancellationToken;
pub use config::CacheConfig;
pub use entry::EntryMetadata;
pub use error::{CacheError, Result};
pub use event::{ChangeMask, WatcherEvent};
pub use path::{normalize_key, RootDir, ROOT_KEY};
pub use state::{CacheStats, WatchState};
pub use store::{EntryMap, MetadataStore, Snapshot};
pub use watch::{EventReceiver, EventSender};
