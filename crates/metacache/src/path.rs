//! Cache key normalization and root-relative path resolution.
//!
//! Every key in the store is a root-relative path of the form `/a/b.txt`:
//! a single leading `/`, segments joined by `/`, no `.`, `..` or empty
//! segments and no trailing separator. The root itself is `/` and is never
//! stored as an entry.
//!
//! Names that are not valid UTF-8 keep their valid runs and spell every
//! stray byte as `\xNN`, so two distinct names never share a key segment
//! unless a sibling is literally named with that escape.

use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{CacheError, Result};

/// Key of the watched root directory.
pub const ROOT_KEY: &str = "/";

/// Cleans a cache key.
///
/// `..` never climbs above the root, so `"/../a"` becomes `"/a"`.
pub fn normalize_key(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }

    if segments.is_empty() {
        return ROOT_KEY.to_string();
    }

    let mut key = String::with_capacity(path.len() + 1);
    for segment in segments {
        key.push('/');
        key.push_str(segment);
    }
    key
}

/// Key for `name` inside the directory scanned under `prefix`.
///
/// `prefix` is the directory key followed by `/` (the root is just `/`).
pub fn child_key(prefix: &str, name: &str) -> String {
    normalize_key(&format!("{prefix}{name}"))
}

/// Key segment for a directory entry name.
pub fn name_segment(name: &OsStr) -> String {
    match name.to_str() {
        Some(name) => name.to_string(),
        None => escape_invalid(name),
    }
}

#[cfg(unix)]
fn escape_invalid(name: &OsStr) -> String {
    use std::fmt::Write;
    use std::os::unix::ffi::OsStrExt;

    let mut bytes = name.as_bytes();
    let mut segment = String::with_capacity(bytes.len() + 8);
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                segment.push_str(valid);
                return segment;
            }
            Err(error) => {
                let (valid, rest) = bytes.split_at(error.valid_up_to());
                segment.push_str(&String::from_utf8_lossy(valid));
                let invalid_len = error.error_len().unwrap_or(rest.len());
                for byte in &rest[..invalid_len] {
                    let _ = write!(segment, "\\x{byte:02x}");
                }
                bytes = &rest[invalid_len..];
            }
        }
    }
}

#[cfg(not(unix))]
fn escape_invalid(name: &OsStr) -> String {
    name.to_string_lossy().into_owned()
}

/// Prefix used when recursing into the directory at `key`.
pub fn dir_prefix(key: &str) -> String {
    if key == ROOT_KEY {
        ROOT_KEY.to_string()
    } else {
        format!("{key}/")
    }
}

/// Parent key of a normalized key, `None` for the root.
pub fn parent_key(key: &str) -> Option<&str> {
    if key == ROOT_KEY {
        return None;
    }
    match key.rfind('/') {
        Some(0) | None => Some(ROOT_KEY),
        Some(index) => Some(&key[..index]),
    }
}

/// Final component of a normalized key.
pub fn key_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// The configured root directory, canonicalized once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootDir {
    path: PathBuf,
}

impl RootDir {
    /// Canonicalizes `path` and checks that it is a directory.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let canonical = fs::canonicalize(&path).map_err(|error| CacheError::InvalidRoot {
            path: path.clone(),
            reason: error.to_string(),
        })?;
        if !canonical.is_dir() {
            return Err(CacheError::InvalidRoot {
                path,
                reason: "not a directory".to_string(),
            });
        }
        Ok(Self { path: canonical })
    }

    /// Absolute path of the root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maps a key to its absolute path without touching the filesystem.
    pub fn join_key(&self, key: &str) -> PathBuf {
        let mut absolute = self.path.clone();
        for segment in normalize_key(key).split('/').filter(|s| !s.is_empty()) {
            absolute.push(segment);
        }
        absolute
    }

    /// Resolves a root-relative path to an absolute path.
    ///
    /// Fails with `NotFound` when nothing exists at the resolved location.
    /// Symlinks at the final component are not followed.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let absolute = self.join_key(relative);
        match fs::symlink_metadata(&absolute) {
            Ok(_) => Ok(absolute),
            Err(_) => Err(CacheError::NotFound(normalize_key(relative))),
        }
    }

    /// Maps an absolute path under the root back to its key.
    pub fn relative_key(&self, absolute: &Path) -> Option<String> {
        let relative = absolute.strip_prefix(&self.path).ok()?;
        let mut key = String::new();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => {
                    key.push('/');
                    key.push_str(&name_segment(segment));
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        if key.is_empty() {
            key.push_str(ROOT_KEY);
        }
        Some(key)
    }

    /// True if `absolute` is the root or lies beneath it.
    pub fn contains(&self, absolute: &Path) -> bool {
        absolute.starts_with(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn normalize_collapses_separators_and_dots() {
        assert_eq!(normalize_key("/a//b/./c/"), "/a/b/c");
        assert_eq!(normalize_key("a/b"), "/a/b");
        assert_eq!(normalize_key("/a/b/../c"), "/a/c");
        assert_eq!(normalize_key(""), "/");
        assert_eq!(normalize_key("//"), "/");
    }

    #[test]
    fn normalize_never_climbs_above_root() {
        assert_eq!(normalize_key("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(normalize_key(".."), "/");
    }

    #[test]
    fn child_keys_do_not_double_separators() {
        assert_eq!(child_key("/", "a.txt"), "/a.txt");
        assert_eq!(child_key(&dir_prefix("/b"), "c.txt"), "/b/c.txt");
        assert_eq!(dir_prefix("/"), "/");
    }

    #[test]
    fn parent_and_name_of_keys() {
        assert_eq!(parent_key("/b/c.txt"), Some("/b"));
        assert_eq!(parent_key("/a.txt"), Some("/"));
        assert_eq!(parent_key("/"), None);
        assert_eq!(key_name("/b/c.txt"), "c.txt");
    }

    #[test]
    fn utf8_names_pass_through() {
        assert_eq!(name_segment(OsStr::new("plain.txt")), "plain.txt");
        assert_eq!(name_segment(OsStr::new("\\x41")), "\\x41");
    }

    #[cfg(unix)]
    #[test]
    fn invalid_bytes_are_escaped_one_by_one() {
        use std::os::unix::ffi::OsStrExt;

        assert_eq!(name_segment(OsStr::from_bytes(b"a\xff")), "a\\xff");
        assert_eq!(name_segment(OsStr::from_bytes(b"a\xfe")), "a\\xfe");
        assert_eq!(
            name_segment(OsStr::from_bytes(b"\xc3(\xe2\x82ok")),
            "\\xc3(\\xe2\\x82ok"
        );
    }

    #[cfg(unix)]
    #[test]
    fn relative_key_escapes_event_paths_like_the_walker() {
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        let root = RootDir::new(temp.path()).unwrap();
        let absolute = root.path().join(OsStr::from_bytes(b"bad\xffdir"));
        assert_eq!(root.relative_key(&absolute).as_deref(), Some("/bad\\xffdir"));
    }

    #[test]
    fn resolve_reports_missing_paths() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("present.txt")).unwrap();
        let root = RootDir::new(temp.path()).unwrap();

        let resolved = root.resolve("present.txt").unwrap();
        assert_eq!(resolved, root.path().join("present.txt"));

        let missing = root.resolve("/absent.txt").unwrap_err();
        assert!(missing.is_not_found());
    }

    #[test]
    fn resolve_stays_inside_root() {
        let temp = TempDir::new().unwrap();
        let root = RootDir::new(temp.path()).unwrap();
        let joined = root.join_key("/../../outside");
        assert_eq!(joined, root.path().join("outside"));
    }

    #[test]
    fn relative_key_round_trips_joined_paths() {
        let temp = TempDir::new().unwrap();
        let root = RootDir::new(temp.path()).unwrap();

        let absolute = root.join_key("/b/c.txt");
        assert_eq!(root.relative_key(&absolute).as_deref(), Some("/b/c.txt"));
        assert_eq!(root.relative_key(root.path()).as_deref(), Some("/"));
        assert_eq!(root.relative_key(Path::new("/definitely/elsewhere")), None);
    }

    #[test]
    fn root_must_be_an_existing_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        File::create(&file).unwrap();

        assert!(matches!(
            RootDir::new(temp.path().join("missing")),
            Err(CacheError::InvalidRoot { .. })
        ));
        assert!(matches!(
            RootDir::new(&file),
            Err(CacheError::InvalidRoot { .. })
        ));
    }
}
