//! Repository decorator that keeps every record, remote link and backup
//! description in memory.
//!
//! Each save owns one map entry. Mutations hold that entry's write guard
//! across the disk write and the cache update; reads take the shared guard.
//! A reader therefore never sees the disk and the cache disagree.

use super::direct::DirectRepository;
use super::{BlobWriter, Identifier, Repository};
use crate::fs::{atomic, hash};
use crate::models::{Backup, RemoteLink, SaveRecord};
use crate::utils::errors::{Result, SaveError};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct CachedGame {
    record: Option<SaveRecord>,
    blob_hash: Option<String>,
    remote: Option<RemoteLink>,
    backups: BTreeMap<String, Backup>,
}

impl CachedGame {
    /// Read everything known about one save from disk.
    fn load(inner: &DirectRepository, game_id: &str) -> Result<Self> {
        let record = match inner.stored_metadata(game_id) {
            Ok(record) => Some(record),
            Err(SaveError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let mut backups = BTreeMap::new();
        for backup_id in inner.list_backups(game_id)? {
            let backup = inner.backup_info(game_id, &backup_id)?;
            backups.insert(backup_id, backup);
        }

        Ok(Self {
            record,
            blob_hash: inner.blob_hash(&Identifier::game(game_id))?,
            remote: inner.remote(game_id)?,
            backups,
        })
    }
}

/// Exclusive guard on a save's entry, loading it from disk on first use.
fn lock_entry<'a>(
    entries: &'a DashMap<String, CachedGame>,
    inner: &DirectRepository,
    game_id: &str,
) -> Result<RefMut<'a, String, CachedGame>> {
    match entries.entry(game_id.to_string()) {
        Entry::Occupied(entry) => Ok(entry.into_ref()),
        Entry::Vacant(entry) => {
            let loaded = CachedGame::load(inner, game_id)?;
            Ok(entry.insert(loaded))
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachingRepository {
    inner: DirectRepository,
    entries: Arc<DashMap<String, CachedGame>>,
}

impl CachingRepository {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(DirectRepository::open(root)?))
    }

    pub fn new(inner: DirectRepository) -> Self {
        Self {
            inner,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Walk every save and backup once, hashing all blobs.
    pub fn preload(&self) -> Result<()> {
        let started = Instant::now();
        let games = self.inner.list_games()?;

        for game_id in &games {
            let loaded = CachedGame::load(&self.inner, game_id)?;
            debug!(id = %game_id, backups = loaded.backups.len(), "preloaded save");
            self.entries.insert(game_id.clone(), loaded);
        }

        info!(
            saves = games.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "datastore cache ready"
        );
        Ok(())
    }
}

impl Repository for CachingRepository {
    fn ensure(&self, id: &Identifier) -> Result<()> {
        self.inner.ensure(id)
    }

    fn list_games(&self) -> Result<Vec<String>> {
        let mut games: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.record.is_some())
            .map(|entry| entry.key().clone())
            .collect();
        games.sort();
        Ok(games)
    }

    fn list_backups(&self, game_id: &str) -> Result<Vec<String>> {
        Identifier::game(game_id).validate()?;
        Ok(self
            .entries
            .get(game_id)
            .map(|entry| entry.backups.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn write_blob(&self, id: &Identifier) -> Result<BlobWriter> {
        let writer = self.inner.write_blob(id)?;

        let entries = Arc::clone(&self.entries);
        let inner = self.inner.clone();
        let id = id.clone();

        Ok(writer.with_commit_hook(Box::new(move |file, target| {
            // Hash and stamp before taking the guard; rename keeps both valid.
            let digest = hash::hash_file(file.path())
                .map_err(|e| SaveError::io(format!("[{}] failed to hash blob", id), e))?;
            let modified = file
                .as_file()
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|e| SaveError::io(format!("[{}] failed to stat blob", id), e))?;

            let mut entry = lock_entry(&entries, &inner, id.game_id())?;
            atomic::persist(file, target)
                .map_err(|e| SaveError::io(format!("[{}] failed to commit blob", id), e))?;

            match &id {
                Identifier::Game(_) => entry.blob_hash = Some(digest),
                Identifier::Backup { backup_id, .. } => {
                    entry.backups.insert(
                        backup_id.clone(),
                        Backup {
                            uuid: backup_id.clone(),
                            hash: digest,
                            created_at: DateTime::<Utc>::from(modified),
                        },
                    );
                }
            }
            Ok(())
        })))
    }

    fn read_blob(&self, id: &Identifier) -> Result<File> {
        self.inner.read_blob(id)
    }

    fn write_metadata(&self, game_id: &str, record: &SaveRecord) -> Result<()> {
        Identifier::game(game_id).validate()?;
        let mut entry = lock_entry(&self.entries, &self.inner, game_id)?;

        self.inner.write_metadata(game_id, record)?;
        entry.record = Some(record.without_hash());
        Ok(())
    }

    fn metadata(&self, game_id: &str) -> Result<SaveRecord> {
        Identifier::game(game_id).validate()?;
        let entry = self
            .entries
            .get(game_id)
            .ok_or_else(|| SaveError::NotFound(format!("save {}", game_id)))?;

        let mut record = entry
            .record
            .clone()
            .ok_or_else(|| SaveError::NotFound(format!("save {}", game_id)))?;
        record.hash = entry.blob_hash.clone();
        Ok(record)
    }

    fn backup_info(&self, game_id: &str, backup_id: &str) -> Result<Backup> {
        Identifier::backup(game_id, backup_id).validate()?;
        self.entries
            .get(game_id)
            .and_then(|entry| entry.backups.get(backup_id).cloned())
            .ok_or_else(|| SaveError::NotFound(format!("backup {}:{}", game_id, backup_id)))
    }

    fn set_remote(&self, game_id: &str, url: &str) -> Result<()> {
        Identifier::game(game_id).validate()?;
        let mut entry = lock_entry(&self.entries, &self.inner, game_id)?;

        self.inner.set_remote(game_id, url)?;
        entry.remote = Some(RemoteLink {
            url: url.to_string(),
            game_id: game_id.to_string(),
        });
        Ok(())
    }

    fn remote(&self, game_id: &str) -> Result<Option<RemoteLink>> {
        Identifier::game(game_id).validate()?;
        Ok(self
            .entries
            .get(game_id)
            .and_then(|entry| entry.remote.clone()))
    }

    fn remove(&self, game_id: &str) -> Result<()> {
        Identifier::game(game_id).validate()?;
        match self.entries.entry(game_id.to_string()) {
            Entry::Occupied(entry) => {
                self.inner.remove(game_id)?;
                entry.remove();
            }
            Entry::Vacant(_) => self.inner.remove(game_id)?,
        }
        Ok(())
    }

    fn remove_backup(&self, game_id: &str, backup_id: &str) -> Result<()> {
        Identifier::backup(game_id, backup_id).validate()?;
        let mut entry = lock_entry(&self.entries, &self.inner, game_id)?;

        self.inner.remove_backup(game_id, backup_id)?;
        entry.backups.remove(backup_id);
        Ok(())
    }

    fn last_scan(&self, game_id: &str) -> Result<DateTime<Utc>> {
        self.inner.last_scan(game_id)
    }

    fn reset_scan_at(&self, game_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.reset_scan_at(game_id, at)
    }

    fn data_path(&self, id: &Identifier) -> PathBuf {
        self.inner.data_path(id)
    }
}
