//! Repository that goes to disk for everything, rehashing blobs on every read.

use super::{BlobWriter, Identifier, Repository};
use crate::archive::BLOB_FILE_NAME;
use crate::fs::{atomic, hash};
use crate::models::{Backup, RemoteLink, SaveRecord};
use crate::utils::errors::{Result, SaveError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub(crate) const METADATA_FILE_NAME: &str = "metadata.json";
pub(crate) const REMOTE_FILE_NAME: &str = "remote.json";
pub(crate) const SCAN_MARKER_FILE_NAME: &str = ".last_scan";
pub(crate) const BACKUP_DIR_NAME: &str = "hist";

#[derive(Serialize, Deserialize)]
struct RemoteFile {
    url: String,
}

/// Map "file does not exist" to [`SaveError::NotFound`], anything else to an I/O error.
fn missing_or_io(err: io::Error, what: String) -> SaveError {
    if err.kind() == io::ErrorKind::NotFound {
        SaveError::NotFound(what)
    } else {
        SaveError::io(what, err)
    }
}

#[derive(Debug, Clone)]
pub struct DirectRepository {
    root: PathBuf,
}

impl DirectRepository {
    /// Open (and create if needed) a repository rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| SaveError::io(format!("failed to create datastore {}", root.display()), e))?;

        debug!(root = %root.display(), "opened datastore");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn game_dir(&self, game_id: &str) -> PathBuf {
        self.root.join(game_id)
    }

    fn dir(&self, id: &Identifier) -> PathBuf {
        match id {
            Identifier::Game(game_id) => self.game_dir(game_id),
            Identifier::Backup { game_id, backup_id } => {
                self.game_dir(game_id).join(BACKUP_DIR_NAME).join(backup_id)
            }
        }
    }

    fn game(game_id: &str) -> Result<Identifier> {
        let id = Identifier::game(game_id);
        id.validate()?;
        Ok(id)
    }

    /// Stored record without touching the blob.
    pub(crate) fn stored_metadata(&self, game_id: &str) -> Result<SaveRecord> {
        Self::game(game_id)?;
        let path = self.game_dir(game_id).join(METADATA_FILE_NAME);
        let content = fs::read(&path).map_err(|e| missing_or_io(e, format!("save {}", game_id)))?;

        let record: SaveRecord = serde_json::from_slice(&content)
            .map_err(|e| SaveError::corrupted(format!("metadata of {}", game_id), e))?;
        Ok(record.without_hash())
    }

    /// Hash of a blob, `None` when it does not exist.
    pub(crate) fn blob_hash(&self, id: &Identifier) -> Result<Option<String>> {
        match hash::hash_file(&self.data_path(id)) {
            Ok(digest) => Ok(Some(digest)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SaveError::io(format!("[{}] failed to hash blob", id), e)),
        }
    }
}

impl Repository for DirectRepository {
    fn ensure(&self, id: &Identifier) -> Result<()> {
        id.validate()?;
        let dir = self.dir(id);
        fs::create_dir_all(&dir)
            .map_err(|e| SaveError::io(format!("[{}] failed to create {}", id, dir.display()), e))
    }

    fn list_games(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| SaveError::io(format!("failed to list {}", self.root.display()), e))?;

        let mut games = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SaveError::io("failed to list saves", e))?;
            if !entry.path().join(METADATA_FILE_NAME).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                games.push(name.to_string());
            }
        }

        games.sort();
        Ok(games)
    }

    fn list_backups(&self, game_id: &str) -> Result<Vec<String>> {
        Self::game(game_id)?;
        let dir = self.game_dir(game_id).join(BACKUP_DIR_NAME);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SaveError::io(format!("[{}] failed to list backups", game_id), e)),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| SaveError::io(format!("[{}] failed to list backups", game_id), e))?;
            if !entry.path().join(BLOB_FILE_NAME).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                backups.push(name.to_string());
            }
        }

        backups.sort();
        Ok(backups)
    }

    fn write_blob(&self, id: &Identifier) -> Result<BlobWriter> {
        self.ensure(id)?;
        BlobWriter::create(id.clone(), self.data_path(id))
    }

    fn read_blob(&self, id: &Identifier) -> Result<File> {
        id.validate()?;
        File::open(self.data_path(id)).map_err(|e| missing_or_io(e, format!("blob of {}", id)))
    }

    fn write_metadata(&self, game_id: &str, record: &SaveRecord) -> Result<()> {
        let id = Self::game(game_id)?;
        self.ensure(&id)?;

        let content = serde_json::to_vec_pretty(&record.without_hash())
            .map_err(|e| SaveError::corrupted(format!("metadata of {}", game_id), e))?;
        atomic::write_atomic(&self.game_dir(game_id).join(METADATA_FILE_NAME), &content)
            .map_err(|e| SaveError::io(format!("[{}] failed to write metadata", game_id), e))?;

        debug!(id = game_id, version = record.version, "metadata written");
        Ok(())
    }

    fn metadata(&self, game_id: &str) -> Result<SaveRecord> {
        let mut record = self.stored_metadata(game_id)?;
        record.hash = self.blob_hash(&Identifier::game(game_id))?;
        Ok(record)
    }

    fn backup_info(&self, game_id: &str, backup_id: &str) -> Result<Backup> {
        let id = Identifier::backup(game_id, backup_id);
        id.validate()?;
        let path = self.data_path(&id);

        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| missing_or_io(e, format!("backup {}", id)))?;
        let digest =
            hash::hash_file(&path).map_err(|e| missing_or_io(e, format!("backup {}", id)))?;

        Ok(Backup {
            uuid: backup_id.to_string(),
            hash: digest,
            created_at: DateTime::<Utc>::from(modified),
        })
    }

    fn set_remote(&self, game_id: &str, url: &str) -> Result<()> {
        self.stored_metadata(game_id)?;

        let content = serde_json::to_vec(&RemoteFile {
            url: url.to_string(),
        })
        .map_err(|e| SaveError::corrupted(format!("remote of {}", game_id), e))?;
        atomic::write_atomic(&self.game_dir(game_id).join(REMOTE_FILE_NAME), &content)
            .map_err(|e| SaveError::io(format!("[{}] failed to write remote", game_id), e))?;

        debug!(id = game_id, url, "remote set");
        Ok(())
    }

    fn remote(&self, game_id: &str) -> Result<Option<RemoteLink>> {
        Self::game(game_id)?;
        let path = self.game_dir(game_id).join(REMOTE_FILE_NAME);

        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SaveError::io(format!("[{}] failed to read remote", game_id), e)),
        };

        let remote: RemoteFile = serde_json::from_slice(&content)
            .map_err(|e| SaveError::corrupted(format!("remote of {}", game_id), e))?;
        Ok(Some(RemoteLink {
            url: remote.url,
            game_id: game_id.to_string(),
        }))
    }

    fn remove(&self, game_id: &str) -> Result<()> {
        Self::game(game_id)?;
        match fs::remove_dir_all(self.game_dir(game_id)) {
            Ok(()) => {
                debug!(id = game_id, "save removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SaveError::io(format!("[{}] failed to remove", game_id), e)),
        }
    }

    fn remove_backup(&self, game_id: &str, backup_id: &str) -> Result<()> {
        let id = Identifier::backup(game_id, backup_id);
        id.validate()?;
        match fs::remove_dir_all(self.dir(&id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SaveError::io(format!("[{}] failed to remove backup", id), e)),
        }
    }

    fn last_scan(&self, game_id: &str) -> Result<DateTime<Utc>> {
        Self::game(game_id)?;
        let path = self.game_dir(game_id).join(SCAN_MARKER_FILE_NAME);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DateTime::UNIX_EPOCH),
            Err(e) => {
                return Err(SaveError::io(format!("[{}] failed to read scan marker", game_id), e))
            }
        };

        DateTime::parse_from_rfc3339(content.trim())
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| SaveError::corrupted(format!("scan marker of {}", game_id), e))
    }

    fn reset_scan_at(&self, game_id: &str, at: DateTime<Utc>) -> Result<()> {
        let id = Self::game(game_id)?;
        self.ensure(&id)?;

        let at = at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
        atomic::write_atomic(&self.game_dir(game_id).join(SCAN_MARKER_FILE_NAME), at.as_bytes())
            .map_err(|e| SaveError::io(format!("[{}] failed to write scan marker", game_id), e))
    }

    fn data_path(&self, id: &Identifier) -> PathBuf {
        self.dir(id).join(BLOB_FILE_NAME)
    }
}
