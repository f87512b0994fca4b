//! Atomic blob replacement.

use super::Identifier;
use crate::fs::atomic;
use crate::utils::errors::{Result, SaveError};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Moves the finished temporary file into place (and updates whatever state
/// the repository keeps about it).
pub(crate) type CommitHook = Box<dyn FnOnce(NamedTempFile, &Path) -> Result<()> + Send>;

/// Writable handle on the next version of a blob.
///
/// Bytes go to a temporary file next to the final location; [`commit`]
/// renames it into place. Dropping the writer without committing discards
/// everything that was written and leaves the previous blob untouched.
///
/// [`commit`]: BlobWriter::commit
pub struct BlobWriter {
    id: Identifier,
    target: PathBuf,
    file: NamedTempFile,
    modified: Option<DateTime<Utc>>,
    on_commit: Option<CommitHook>,
}

impl BlobWriter {
    pub(crate) fn create(id: Identifier, target: PathBuf) -> Result<Self> {
        let file = atomic::temp_file_for(&target)
            .map_err(|e| SaveError::io(format!("[{}] failed to open blob for writing", id), e))?;

        Ok(Self {
            id,
            target,
            file,
            modified: None,
            on_commit: None,
        })
    }

    pub(crate) fn with_commit_hook(mut self, hook: CommitHook) -> Self {
        self.on_commit = Some(hook);
        self
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Stamp the blob's modification time when it is committed.
    pub fn set_modified(&mut self, at: DateTime<Utc>) {
        self.modified = Some(at);
    }

    /// Make the written bytes the current blob.
    pub fn commit(mut self) -> Result<()> {
        let context = |what: &str| format!("[{}] failed to {} blob", self.id, what);

        self.file.flush().map_err(|e| SaveError::io(context("flush"), e))?;

        if let Some(at) = self.modified {
            let mtime = FileTime::from_unix_time(at.timestamp(), at.timestamp_subsec_nanos());
            filetime::set_file_mtime(self.file.path(), mtime)
                .map_err(|e| SaveError::io(context("stamp"), e))?;
        }

        debug!(id = %self.id, target = %self.target.display(), "committing blob");

        match self.on_commit.take() {
            Some(hook) => hook(self.file, &self.target),
            None => atomic::persist(self.file, &self.target)
                .map_err(|e| SaveError::io(format!("[{}] failed to commit blob", self.id), e)),
        }
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
