//! Write-to-temporary-then-rename helpers.
//!
//! A file replaced through these helpers is either the previous version or
//! the complete new one; a crash never leaves a truncated file under the
//! final name.

use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Create a temporary file next to `path`, so the final rename stays on the
/// same filesystem.
pub fn temp_file_for(path: &Path) -> io::Result<NamedTempFile> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"))?;

    tempfile::Builder::new().prefix(".part-").tempfile_in(dir)
}

/// Flush a temporary file to disk and move it to `path`.
pub fn persist(file: NamedTempFile, path: &Path) -> io::Result<()> {
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = temp_file_for(path)?;
    file.write_all(contents)?;
    persist(file, path)
}
