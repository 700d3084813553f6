//! Host-supplied cache configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::ChangeMask;

/// Configuration supplied by the hosting process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory whose tree is mirrored.
    pub root: PathBuf,
    /// Subscribe to the whole tree rather than the root directory alone.
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Change kinds that trigger a rebuild: `create`, `remove`, `rename`,
    /// `modify` or `structural`.
    #[serde(default = "default_rebuild_on")]
    pub rebuild_on: Vec<String>,
}

fn default_recursive() -> bool {
    true
}

fn default_rebuild_on() -> Vec<String> {
    vec!["create".into(), "remove".into(), "rename".into()]
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: default_recursive(),
            rebuild_on: default_rebuild_on(),
        }
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Also rebuild on in-place content modification.
    pub fn rebuild_on_modify(mut self) -> Self {
        if !self.rebuild_on.iter().any(|kind| kind == "modify") {
            self.rebuild_on.push("modify".into());
        }
        self
    }

    pub fn rebuild_mask(&self) -> Result<ChangeMask> {
        ChangeMask::from_names(self.rebuild_on.as_slice())
    }
}
