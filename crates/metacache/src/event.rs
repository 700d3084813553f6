//! Classification of filesystem notifications.
//!
//! Watcher callbacks translate `notify` results into [`WatcherEvent`]s and send
//! them through a channel; the watch thread is the sole consumer and decides
//! whether an event warrants a rebuild.

use std::path::PathBuf;

use bitflags::bitflags;
use notify::event::ModifyKind;
use notify::{Event, EventKind};

use crate::error::{CacheError, Result};
use crate::path::RootDir;

bitflags! {
    /// Kinds of change carried by an event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChangeMask: u8 {
        const CREATE = 0b0000_0001;
        const REMOVE = 0b0000_0010;
        const RENAME = 0b0000_0100;
        const MODIFY = 0b0000_1000;
        /// Creation, removal or rename of an entry.
        const STRUCTURAL = Self::CREATE.bits() | Self::REMOVE.bits() | Self::RENAME.bits();
    }
}

impl ChangeMask {
    /// Maps a notify event kind onto a change mask.
    ///
    /// Access events map to the empty mask. `Any` and `Other` carry no usable
    /// information and are treated as structural.
    pub fn classify(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => Self::CREATE,
            EventKind::Remove(_) => Self::REMOVE,
            EventKind::Modify(ModifyKind::Name(_)) => Self::RENAME,
            EventKind::Modify(_) => Self::MODIFY,
            EventKind::Access(_) => Self::empty(),
            EventKind::Any | EventKind::Other => Self::STRUCTURAL,
        }
    }

    /// Parses change kind names as used in configuration.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        names.iter().try_fold(Self::empty(), |mask, name| {
            let flag = match name.as_ref().trim().to_ascii_lowercase().as_str() {
                "create" => Self::CREATE,
                "remove" => Self::REMOVE,
                "rename" => Self::RENAME,
                "modify" => Self::MODIFY,
                "structural" => Self::STRUCTURAL,
                other => {
                    return Err(CacheError::InvalidConfig(format!(
                        "unknown change kind: {other}"
                    )))
                }
            };
            Ok(mask | flag)
        })
    }
}

/// An event sent from a notification source to the watch thread.
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    /// Entries at `paths` changed.
    Changed { mask: ChangeMask, paths: Vec<PathBuf> },
    /// The backend lost track of changes; only a full rebuild recovers.
    RescanRequired,
    /// The notification source reported an error.
    Error(String),
}

impl WatcherEvent {
    /// Translates a notify callback result. Returns `None` for access events.
    pub fn from_notify(result: notify::Result<Event>) -> Option<Self> {
        match result {
            Ok(event) => {
                if event.need_rescan() {
                    return Some(Self::RescanRequired);
                }
                let mask = ChangeMask::classify(&event.kind);
                if mask.is_empty() {
                    return None;
                }
                if event.paths.is_empty() {
                    return Some(Self::RescanRequired);
                }
                Some(Self::Changed {
                    mask,
                    paths: event.paths,
                })
            }
            Err(error) => Some(Self::Error(error.to_string())),
        }
    }

    /// Whether this event should trigger a rebuild of the cache rooted at `root`.
    pub fn triggers_rebuild(&self, root: &RootDir, rebuild_on: ChangeMask) -> bool {
        match self {
            Self::Changed { mask, paths } => {
                mask.intersects(rebuild_on) && paths.iter().any(|path| root.contains(path))
            }
            Self::RescanRequired => true,
            Self::Error(_) => false,
        }
    }
}
