//! Archive codec: a save directory packed as a zstd-compressed tar stream.
//!
//! Entry names are relative to the parent of the packed directory, so the
//! top-level directory name travels with the archive. Unpacking into the
//! parent of the original directory therefore restores it in place.

use crate::fs::walker::{walk_directory, EntryKind};
use crate::utils::errors::{Result, SaveError};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use tracing::debug;

/// Default zstd level for save archives
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// File name of a blob inside a repository directory
pub const BLOB_FILE_NAME: &str = "data.tar.zst";

/// Pack the tree rooted at `root` into `writer`, returning the writer once
/// the compressed stream is finished.
pub fn pack<W: Write>(root: &Path, writer: W, level: i32) -> Result<W> {
    let root = root
        .canonicalize()
        .map_err(|e| SaveError::io(format!("failed to resolve {}", root.display()), e))?;
    let base = root.parent().unwrap_or(&root).to_path_buf();

    let entries = walk_directory(&root, &base)
        .map_err(|e| SaveError::io(format!("failed to walk {}", root.display()), e))?;

    debug!(root = %root.display(), entries = entries.len(), "packing directory");

    let encoder = zstd::stream::write::Encoder::new(writer, level)
        .map_err(|e| SaveError::io("failed to start compression", e))?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in &entries {
        if entry.relative_path.as_os_str().is_empty() {
            continue;
        }

        let appended = match entry.kind {
            EntryKind::Directory => builder.append_dir(&entry.relative_path, &entry.path),
            EntryKind::File | EntryKind::Symlink => {
                builder.append_path_with_name(&entry.path, &entry.relative_path)
            }
            EntryKind::Other => std::fs::symlink_metadata(&entry.path).and_then(|metadata| {
                let mut header = tar::Header::new_gnu();
                header.set_metadata(&metadata);
                header.set_size(0);
                builder.append_data(&mut header, &entry.relative_path, io::empty())
            }),
        };

        appended.map_err(|e| {
            SaveError::io(format!("failed to archive {}", entry.path.display()), e)
        })?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| SaveError::io("failed to finish archive", e))?;
    let writer = encoder
        .finish()
        .map_err(|e| SaveError::io("failed to finish compression", e))?;

    Ok(writer)
}

/// Extract an archive produced by [`pack`] under `dest`.
///
/// Directories are created as needed and regular files are overwritten. An
/// empty stream extracts nothing.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let is_empty = reader
        .fill_buf()
        .map_err(|e| SaveError::io("failed to read archive", e))?
        .is_empty();
    if is_empty {
        debug!(dest = %dest.display(), "empty archive, nothing to extract");
        return Ok(());
    }

    std::fs::create_dir_all(dest)
        .map_err(|e| SaveError::io(format!("failed to create {}", dest.display()), e))?;

    let decoder = zstd::stream::read::Decoder::with_buffer(reader)
        .map_err(|e| SaveError::io("failed to start decompression", e))?;
    let mut archive = tar::Archive::new(decoder);
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .map_err(|e| SaveError::io("failed to read archive entries", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| SaveError::io("failed to read archive entry", e))?;
        let name = entry.path().map(|p| p.display().to_string()).unwrap_or_default();

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| SaveError::io(format!("failed to extract {}", name), e))?;
        if !unpacked {
            return Err(SaveError::Archive(format!(
                "entry {} escapes the destination directory",
                name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Relative path -> Some(content) for files, None for directories
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
        walkdir::WalkDir::new(root)
            .into_iter()
            .map(|e| e.unwrap())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
                let content = if e.file_type().is_file() {
                    Some(fs::read(e.path()).unwrap())
                } else {
                    None
                };
                (rel, content)
            })
            .collect()
    }

    fn sample_save(parent: &Path) -> std::io::Result<PathBuf> {
        let root = parent.join("HollowKnight");
        fs::create_dir_all(root.join("slots/empty"))?;
        fs::write(root.join("user1.dat"), b"geo=1200")?;
        fs::write(root.join("slots/user2.dat"), vec![7u8; 64 * 1024])?;
        Ok(root)
    }

    #[test]
    fn test_round_trip_preserves_paths_and_content() -> Result<()> {
        let source = TempDir::new().unwrap();
        let root = sample_save(source.path()).unwrap();

        let archive = pack(&root, Vec::new(), DEFAULT_COMPRESSION_LEVEL)?;

        let target = TempDir::new().unwrap();
        unpack(archive.as_slice(), target.path())?;

        let restored = target.path().join("HollowKnight");
        assert!(restored.is_dir());
        assert_eq!(snapshot(&root), snapshot(&restored));
        Ok(())
    }

    #[test]
    fn test_unpack_overwrites_existing_files() -> Result<()> {
        let source = TempDir::new().unwrap();
        let root = sample_save(source.path()).unwrap();
        let archive = pack(&root, Vec::new(), DEFAULT_COMPRESSION_LEVEL)?;

        let target = TempDir::new().unwrap();
        let stale = target.path().join("HollowKnight");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("user1.dat"), b"geo=0 and a much longer stale payload").unwrap();

        unpack(archive.as_slice(), target.path())?;

        assert_eq!(fs::read(stale.join("user1.dat")).unwrap(), b"geo=1200");
        Ok(())
    }

    #[test]
    fn test_unpack_empty_stream_is_noop() -> Result<()> {
        let target = TempDir::new().unwrap();
        unpack(std::io::empty(), target.path())?;
        assert_eq!(fs::read_dir(target.path()).unwrap().count(), 0);
        Ok(())
    }

    #[test]
    fn test_unpack_garbage_fails() {
        let target = TempDir::new().unwrap();
        let result = unpack(&b"definitely not zstd"[..], target.path());
        assert!(matches!(result, Err(SaveError::Io { .. })));
    }

    #[test]
    fn test_pack_missing_directory_fails() {
        let source = TempDir::new().unwrap();
        let result = pack(&source.path().join("missing"), Vec::new(), DEFAULT_COMPRESSION_LEVEL);
        assert!(result.is_err());
    }
}
