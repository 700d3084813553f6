//! Full rebuild of the entry map.
//!
//! The tree is walked level by level: every directory of the current level is
//! read in parallel with rayon and the subdirectories found form the next
//! level, so depth never grows the call stack. Every entry at every depth is
//! visited exactly once and visiting order is unspecified. A directory that
//! cannot be read, or an entry that cannot be stat'ed, fails the whole walk:
//! there is no partial result.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use fnv::FnvHashSet;
use rayon::prelude::*;

use crate::cancel::CancellationToken;
use crate::entry::EntryMetadata;
use crate::error::{CacheError, Result};
use crate::path::{child_key, dir_prefix, name_segment, RootDir, ROOT_KEY};
use crate::store::EntryMap;

/// Counters collected during a walk.
#[derive(Debug, Default)]
pub struct WalkStats {
    pub num_files: AtomicUsize,
    pub num_dirs: AtomicUsize,
}

/// State shared by every directory visit of one walk.
#[derive(Debug)]
struct WalkData<'a> {
    cancel: &'a CancellationToken,
    stats: WalkStats,
}

/// A directory waiting to be read: its real path and its key.
#[derive(Debug)]
struct PendingDir {
    path: PathBuf,
    key: String,
}

/// Entries of one directory plus the subdirectories to descend into.
type DirListing = (Vec<EntryMetadata>, Vec<PendingDir>);

/// Walks the tree under `root` and returns a fresh entry map.
pub fn rebuild(root: &RootDir, cancel: &CancellationToken) -> Result<EntryMap> {
    let started = Instant::now();
    let walk_data = WalkData {
        cancel,
        stats: WalkStats::default(),
    };

    let mut map = EntryMap::default();
    let mut level = vec![PendingDir {
        path: root.path().to_path_buf(),
        key: ROOT_KEY.to_string(),
    }];
    let mut depth = 0usize;
    while !level.is_empty() {
        let listings = level
            .into_par_iter()
            .map(|dir| read_dir_entries(&walk_data, dir))
            .collect::<Result<Vec<DirListing>>>()?;

        level = Vec::new();
        for (entries, subdirs) in listings {
            map.extend(entries.into_iter().map(|entry| (entry.path.clone(), entry)));
            level.extend(subdirs);
        }
        depth += 1;
    }

    log::debug!(
        "metadata walk root={} files={} dirs={} depth={} elapsed_ms={}",
        root.path().display(),
        walk_data.stats.num_files.load(Ordering::Relaxed),
        walk_data.stats.num_dirs.load(Ordering::Relaxed),
        depth,
        started.elapsed().as_millis(),
    );
    Ok(map)
}

/// Reads one directory. Errors carry the real path and the real io error.
fn read_dir_entries(walk_data: &WalkData, dir: PendingDir) -> Result<DirListing> {
    walk_data.cancel.check()?;

    let read_dir =
        fs::read_dir(&dir.path).map_err(|error| CacheError::traversal(&dir.path, error))?;
    let prefix = dir_prefix(&dir.key);
    let mut names = FnvHashSet::default();
    let mut entries = Vec::new();
    let mut subdirs = Vec::new();

    for dir_entry in read_dir {
        let dir_entry = dir_entry.map_err(|error| CacheError::traversal(&dir.path, error))?;
        let path = dir_entry.path();
        let metadata = dir_entry
            .metadata()
            .map_err(|error| CacheError::traversal(&path, error))?;

        let name = name_segment(&dir_entry.file_name());
        if !names.insert(name.clone()) {
            return Err(CacheError::traversal(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("entry name collides with a sibling as key segment {name:?}"),
                ),
            ));
        }

        let entry = EntryMetadata::from_fs_metadata(child_key(&prefix, &name), name, &metadata);
        if entry.is_dir {
            walk_data.stats.num_dirs.fetch_add(1, Ordering::Relaxed);
            subdirs.push(PendingDir {
                path,
                key: entry.path.clone(),
            });
        } else {
            walk_data.stats.num_files.fetch_add(1, Ordering::Relaxed);
        }
        entries.push(entry);
    }

    Ok((entries, subdirs))
}
