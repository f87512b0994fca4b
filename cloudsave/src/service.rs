//! User-facing operations on the local datastore.

use crate::archive;
use crate::models::{Backup, RemoteLink, SaveRecord};
use crate::remote::TransferClient;
use crate::repository::{Identifier, Repository};
use crate::scanner::{ScanOutcome, Scanner};
use crate::utils::errors::{Result, SaveError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Service {
    repository: Arc<dyn Repository>,
    scanner: Scanner,
}

impl Service {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        let scanner = Scanner::new(Arc::clone(&repository));
        Self {
            repository,
            scanner,
        }
    }

    pub fn with_scanner(mut self, scanner: Scanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.repository)
    }

    /// Register a directory. The record starts at version 1 without a blob;
    /// the first scan archives it.
    pub fn add(&self, name: &str, path: &Path) -> Result<String> {
        let path = path
            .canonicalize()
            .map_err(|e| SaveError::io(format!("cannot resolve {}", path.display()), e))?;
        if !path.is_dir() {
            return Err(SaveError::NotFound(format!("{} is not a directory", path.display())));
        }

        let game_id = uuid::Uuid::new_v4().to_string();
        self.repository.ensure(&Identifier::game(&game_id))?;
        self.repository
            .write_metadata(&game_id, &SaveRecord::new(&game_id, name, &path))?;

        info!(id = %game_id, name, path = %path.display(), "save registered");
        Ok(game_id)
    }

    pub fn one(&self, game_id: &str) -> Result<SaveRecord> {
        self.repository.metadata(game_id)
    }

    pub fn all_games(&self) -> Result<Vec<SaveRecord>> {
        self.repository
            .list_games()?
            .iter()
            .map(|game_id| self.repository.metadata(game_id))
            .collect()
    }

    /// Backups of a save, newest first.
    pub fn all_backups(&self, game_id: &str) -> Result<Vec<Backup>> {
        let mut backups = self
            .repository
            .list_backups(game_id)?
            .iter()
            .map(|backup_id| self.repository.backup_info(game_id, backup_id))
            .collect::<Result<Vec<_>>>()?;

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    pub fn scan(&self, game_id: &str) -> Result<ScanOutcome> {
        self.scanner.scan(game_id)
    }

    pub fn scan_all(&self) -> Result<Vec<(String, Result<ScanOutcome>)>> {
        self.scanner.scan_all()
    }

    /// Restore the current blob over the tracked directory.
    pub fn apply_current(&self, game_id: &str) -> Result<()> {
        self.apply(game_id, &Identifier::game(game_id))
    }

    /// Restore a backup over the tracked directory.
    pub fn apply_backup(&self, game_id: &str, backup_id: &str) -> Result<()> {
        self.apply(game_id, &Identifier::backup(game_id, backup_id))
    }

    fn apply(&self, game_id: &str, id: &Identifier) -> Result<()> {
        let record = self.repository.metadata(game_id)?;
        let blob = self.repository.read_blob(id)?;

        archive::unpack(blob, restore_root(&record.path))?;
        // the restored files must not count as a local change
        self.repository.reset_scan(game_id)?;

        info!(id = %id, path = %record.path.display(), "save restored");
        Ok(())
    }

    pub fn set_remote(&self, game_id: &str, url: &str) -> Result<()> {
        self.repository.set_remote(game_id, url)
    }

    pub fn remote(&self, game_id: &str) -> Result<Option<RemoteLink>> {
        self.repository.remote(game_id)
    }

    pub fn all_remotes(&self) -> Result<Vec<(SaveRecord, Option<RemoteLink>)>> {
        self.all_games()?
            .into_iter()
            .map(|record| {
                let remote = self.repository.remote(&record.id)?;
                Ok((record, remote))
            })
            .collect()
    }

    pub fn remove(&self, game_id: &str) -> Result<()> {
        self.repository.remove(game_id)?;
        info!(id = game_id, "save removed");
        Ok(())
    }

    /// Fetch a save that only exists on a remote and restore it under
    /// `parent` (the archive carries the save directory's own name).
    /// Backups come along on a best-effort basis.
    pub async fn pull_new(
        &self,
        client: &dyn TransferClient,
        url: &str,
        game_id: &str,
        parent: &Path,
    ) -> Result<SaveRecord> {
        let remote = client.metadata(game_id).await?;
        let dir_name = remote
            .path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&remote.name));

        let id = Identifier::game(game_id);
        self.repository.ensure(&id)?;

        let mut writer = self.repository.write_blob(&id)?;
        client.pull(game_id, &mut writer).await?;
        writer.commit()?;

        let mut record = SaveRecord::new(game_id, &remote.name, parent.join(dir_name));
        record.version = remote.version;
        record.date = remote.date;
        self.repository.write_metadata(game_id, &record)?;
        self.repository.set_remote(game_id, url)?;

        for backup_id in client.list_backups(game_id).await.unwrap_or_default() {
            if let Err(e) = self.pull_backup(client, game_id, &backup_id).await {
                warn!(id = game_id, backup = %backup_id, error = %e, "failed to pull backup");
            }
        }

        self.apply_current(game_id)?;
        self.repository.metadata(game_id)
    }

    async fn pull_backup(&self, client: &dyn TransferClient, game_id: &str, backup_id: &str) -> Result<()> {
        let backup = client.backup_info(game_id, backup_id).await?;
        let mut writer = self
            .repository
            .write_blob(&Identifier::backup(game_id, backup_id))?;
        client.pull_backup(game_id, backup_id, &mut writer).await?;
        writer.set_modified(backup.created_at);
        writer.commit()
    }
}

/// Archives are rooted at the save directory's parent.
fn restore_root(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}
