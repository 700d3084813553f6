//! Metadata snapshot for a single cached entry.

use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Metadata of one file or directory under the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryMetadata {
    /// Normalized root-relative key, e.g. `/b/c.txt`.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub is_dir: bool,
    /// Set when the entry itself is a symbolic link. Links are not followed.
    pub is_symlink: bool,
    /// Size in bytes as reported by the filesystem.
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Permission bits.
    pub mode: u32,
}

impl EntryMetadata {
    pub fn from_fs_metadata(path: String, name: String, metadata: &fs::Metadata) -> Self {
        let file_type = metadata.file_type();
        Self {
            path,
            name,
            is_dir: file_type.is_dir(),
            is_symlink: file_type.is_symlink(),
            size: metadata.len(),
            modified: metadata.modified().ok(),
            mode: mode_bits(metadata),
        }
    }

    /// Modification time as Unix seconds.
    pub fn modified_at(&self) -> Option<u64> {
        self.modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
    }
}

#[cfg(unix)]
fn mode_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &fs::Metadata) -> u32 {
    let mut mode = if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    };
    if metadata.is_dir() {
        mode |= 0o111;
    }
    mode
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn captures_file_attributes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"hello").unwrap();
        drop(file);

        let metadata = fs::symlink_metadata(&path).unwrap();
        let entry = EntryMetadata::from_fs_metadata("/a.txt".into(), "a.txt".into(), &metadata);

        assert_eq!(entry.size, 5);
        assert!(!entry.is_dir);
        assert!(!entry.is_symlink);
        assert_eq!(entry.modified, metadata.modified().ok());
        assert!(entry.modified_at().is_some());
    }

    #[test]
    fn captures_directory_flag() {
        let temp = TempDir::new().unwrap();
        let metadata = fs::symlink_metadata(temp.path()).unwrap();
        let entry = EntryMetadata::from_fs_metadata("/d".into(), "d".into(), &metadata);
        assert!(entry.is_dir);
    }
}
