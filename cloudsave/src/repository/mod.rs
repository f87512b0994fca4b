//! Durable storage of save records, blobs, backups and remote links.
//!
//! On-disk layout, one directory per save record:
//!
//! ```text
//! <root>/<game_id>/metadata.json
//!                  data.tar.zst
//!                  remote.json        (optional)
//!                  .last_scan         (RFC 3339 timestamp)
//!                  hist/<uuid>/data.tar.zst
//! ```
//!
//! Two flavors implement [`Repository`]: [`DirectRepository`] rehashes blobs
//! on every read, [`CachingRepository`] preloads everything once and serves
//! reads from memory.

pub mod blob;
pub mod caching;
pub mod direct;

pub use blob::BlobWriter;
pub use caching::CachingRepository;
pub use direct::DirectRepository;

use crate::models::{Backup, RemoteLink, SaveRecord};
use crate::utils::errors::{Result, SaveError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Address of a blob owner: a save record, or one of its backups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Game(String),
    Backup { game_id: String, backup_id: String },
}

impl Identifier {
    pub fn game(game_id: impl Into<String>) -> Self {
        Identifier::Game(game_id.into())
    }

    pub fn backup(game_id: impl Into<String>, backup_id: impl Into<String>) -> Self {
        Identifier::Backup {
            game_id: game_id.into(),
            backup_id: backup_id.into(),
        }
    }

    /// The owning save record
    pub fn game_id(&self) -> &str {
        match self {
            Identifier::Game(game_id) => game_id,
            Identifier::Backup { game_id, .. } => game_id,
        }
    }

    /// `game` or `game:backup`
    pub fn key(&self) -> String {
        match self {
            Identifier::Game(game_id) => game_id.clone(),
            Identifier::Backup { game_id, backup_id } => format!("{}:{}", game_id, backup_id),
        }
    }

    /// Identifiers become directory names: reject anything that is not a
    /// single plain path component.
    pub fn validate(&self) -> Result<()> {
        let parts: &[&str] = match self {
            Identifier::Game(game_id) => &[game_id],
            Identifier::Backup { game_id, backup_id } => &[game_id, backup_id],
        };

        for part in parts {
            let valid = !part.is_empty()
                && !part.starts_with('.')
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(SaveError::NotFound(format!("invalid identifier {:?}", part)));
            }
        }

        Ok(())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Which repository flavor to construct at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryMode {
    /// Recompute hashes on every read
    #[default]
    Lazy,
    /// Preload and cache every record and backup
    Eager,
}

/// Storage contract shared by the direct and caching implementations.
pub trait Repository: Send + Sync {
    /// Create the storage location for `id`; no error if it already exists.
    fn ensure(&self, id: &Identifier) -> Result<()>;

    /// Identifiers of every registered save record.
    fn list_games(&self) -> Result<Vec<String>>;

    /// Backup UUIDs of a save record; empty when it has no history.
    fn list_backups(&self, game_id: &str) -> Result<Vec<String>>;

    /// Start an atomic blob replacement. Nothing is visible under the final
    /// name until [`BlobWriter::commit`].
    fn write_blob(&self, id: &Identifier) -> Result<BlobWriter>;

    fn read_blob(&self, id: &Identifier) -> Result<File>;

    /// Persist a record. The hash field is derived and never stored.
    fn write_metadata(&self, game_id: &str, record: &SaveRecord) -> Result<()>;

    /// Stored record plus the hash of the current blob (`None` without blob).
    fn metadata(&self, game_id: &str) -> Result<SaveRecord>;

    fn backup_info(&self, game_id: &str, backup_id: &str) -> Result<Backup>;

    fn set_remote(&self, game_id: &str, url: &str) -> Result<()>;

    fn remote(&self, game_id: &str) -> Result<Option<RemoteLink>>;

    /// Delete the whole record: blob, metadata, backups and markers.
    fn remove(&self, game_id: &str) -> Result<()>;

    fn remove_backup(&self, game_id: &str, backup_id: &str) -> Result<()>;

    /// Last time the tracked directory was examined (Unix epoch if never).
    fn last_scan(&self, game_id: &str) -> Result<DateTime<Utc>>;

    /// Record that the tracked directory was examined at `at`.
    fn reset_scan_at(&self, game_id: &str, at: DateTime<Utc>) -> Result<()>;

    fn reset_scan(&self, game_id: &str) -> Result<()> {
        self.reset_scan_at(game_id, Utc::now())
    }

    fn data_path(&self, id: &Identifier) -> PathBuf;
}

/// Open the repository flavor selected by configuration.
pub fn open(root: &Path, mode: RepositoryMode) -> Result<Arc<dyn Repository>> {
    match mode {
        RepositoryMode::Lazy => Ok(Arc::new(DirectRepository::open(root)?)),
        RepositoryMode::Eager => {
            let repository = CachingRepository::open(root)?;
            repository.preload()?;
            Ok(Arc::new(repository))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_keys() {
        assert_eq!(Identifier::game("g1").key(), "g1");
        assert_eq!(Identifier::backup("g1", "b2").key(), "g1:b2");
        assert_eq!(Identifier::backup("g1", "b2").game_id(), "g1");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(Identifier::game("2f1c9a-4b_x").validate().is_ok());
        assert!(Identifier::game("").validate().is_err());
        assert!(Identifier::game("..").validate().is_err());
        assert!(Identifier::game("a/b").validate().is_err());
        assert!(Identifier::backup("ok", "../escape").validate().is_err());
    }
}
