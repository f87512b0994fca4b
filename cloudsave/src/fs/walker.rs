//! Directory traversal for change detection and archival.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Kind of filesystem entry found during a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    /// Devices, fifos, sockets: archived structurally, never with content
    Other,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Path relative to the walk base
    pub relative_path: PathBuf,

    pub kind: EntryKind,

    /// Size in bytes (0 for anything but regular files)
    pub size: u64,

    /// Last modification time
    pub modified: DateTime<Utc>,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, base: &Path) -> std::io::Result<Self> {
        // Symlinks are never followed, this is the link's own metadata
        let metadata = entry.metadata().map_err(std::io::Error::from)?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(base).unwrap_or(&path).to_path_buf();

        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        Ok(Self {
            path,
            relative_path,
            kind,
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
            modified: DateTime::<Utc>::from(metadata.modified()?),
        })
    }
}

/// Walk `root` (inclusive) and collect every entry, sorted by file name.
///
/// Relative paths are computed against `base`, which must be an ancestor of
/// `root` (or `root` itself).
pub fn walk_directory(root: &Path, base: &Path) -> std::io::Result<Vec<FileInfo>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        entries.push(FileInfo::from_entry(&entry, base)?);
    }

    Ok(entries)
}

/// Returns true as soon as one entry under `root` (root included) was
/// modified strictly after `since`.
pub fn changed_since(root: &Path, since: DateTime<Utc>) -> std::io::Result<bool> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        let modified = entry.metadata().map_err(std::io::Error::from)?.modified()?;

        if DateTime::<Utc>::from(modified) > since {
            return Ok(true);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, at: DateTime<Utc>) -> std::io::Result<()> {
        let ft = FileTime::from_unix_time(at.timestamp(), at.timestamp_subsec_nanos());
        filetime::set_file_mtime(path, ft)
    }

    #[test]
    fn test_walk_includes_root_and_directories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("save");
        fs::create_dir_all(root.join("slot1"))?;
        fs::write(root.join("slot1/data.sav"), b"content1")?;
        fs::write(root.join("config.ini"), b"x=1")?;

        let entries = walk_directory(&root, temp_dir.path())?;
        let paths: Vec<_> = entries
            .iter()
            .map(|e| e.relative_path.to_string_lossy().to_string())
            .collect();

        assert_eq!(paths, vec!["save", "save/config.ini", "save/slot1", "save/slot1/data.sav"]);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[1].size, 3);

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_are_not_followed() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("target.txt"), b"payload")?;
        std::os::unix::fs::symlink(temp_dir.path().join("target.txt"), temp_dir.path().join("link"))?;

        let entries = walk_directory(temp_dir.path(), temp_dir.path())?;
        let link = entries
            .iter()
            .find(|e| e.relative_path == Path::new("link"))
            .unwrap();

        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.size, 0);

        Ok(())
    }

    #[test]
    fn test_changed_since() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("save.dat");
        fs::write(&file, b"v1")?;

        let past = Utc::now() - Duration::hours(1);
        set_mtime(temp_dir.path(), past)?;
        set_mtime(&file, past)?;

        assert!(changed_since(temp_dir.path(), past - Duration::seconds(1))?);
        // Strictly after: equal timestamps are not a change
        assert!(!changed_since(temp_dir.path(), past)?);

        set_mtime(&file, past + Duration::minutes(5))?;
        assert!(changed_since(temp_dir.path(), past)?);

        Ok(())
    }

    #[test]
    fn test_changed_since_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = changed_since(&temp_dir.path().join("missing"), DateTime::<Utc>::UNIX_EPOCH);
        assert!(result.is_err());
    }
}
