//! Reconciliation of local saves against their remotes.
//!
//! Per save: heartbeat, existence check, backup history, then one primary
//! decision from `(hash equal?, local version vs remote version)`:
//!
//! | hashes | versions        | action                                   |
//! |--------|-----------------|------------------------------------------|
//! | equal  | any             | up to date (adopt remote version if off)  |
//! | differ | local > remote  | push                                     |
//! | differ | local < remote  | pull, adopt remote version and date      |
//! | differ | equal           | conflict, resolved by the caller         |
//!
//! A pulled blob is always committed before the metadata that points at it.

pub mod backups;
pub mod conflict;

pub use backups::BackupSyncReport;
pub use conflict::{ConflictInfo, ConflictResolver, PolicyResolver, Resolution};

use crate::models::SaveRecord;
use crate::remote::{Connector, TransferClient};
use crate::repository::{Identifier, Repository};
use crate::scanner::{Scanner, DEFAULT_MAX_BACKUPS};
use crate::utils::errors::{Result, SaveError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncOutcome {
    Pushed,
    Pulled { version: u64 },
    UpToDate { adopted_version: Option<u64> },
    Conflict {
        info: ConflictInfo,
        resolution: Resolution,
    },
}

/// Result of reconciling one save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameSyncReport {
    pub outcome: SyncOutcome,
    pub backups: BackupSyncReport,
}

#[derive(Debug)]
pub enum SyncStatus {
    Synced(GameSyncReport),
    /// No remote link: nothing to do
    NoRemote,
    /// The remote failed its heartbeat; the whole remote was skipped
    Unreachable(SaveError),
    Failed(SaveError),
}

#[derive(Debug)]
pub struct SyncEntry {
    pub game_id: String,
    pub name: String,
    pub status: SyncStatus,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub entries: Vec<SyncEntry>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| {
                matches!(
                    entry.status,
                    SyncStatus::Failed(_) | SyncStatus::Unreachable(_)
                )
            })
            .count()
    }

    /// `Err(Cancelled)` if the pass was interrupted, `Err(PartialFailure)`
    /// if any save failed.
    pub fn into_result(self) -> Result<Vec<SyncEntry>> {
        if self.cancelled {
            return Err(SaveError::Cancelled);
        }

        let failed = self.failed();
        if failed > 0 {
            return Err(SaveError::PartialFailure {
                failed,
                total: self.entries.len(),
            });
        }

        Ok(self.entries)
    }
}

/// Converges local saves with their remotes. Only talks to the repository
/// and to [`TransferClient`]s; conflicts go through a [`ConflictResolver`].
pub struct Reconciler {
    repository: Arc<dyn Repository>,
    cancel: CancellationToken,
    max_backups: usize,
}

impl Reconciler {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            cancel: CancellationToken::new(),
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }

    /// Cap applied when a discarded local blob is kept as a backup.
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reconcile one save against an already reachable remote.
    pub async fn sync_game(
        &self,
        client: &dyn TransferClient,
        game_id: &str,
        resolver: &dyn ConflictResolver,
    ) -> Result<GameSyncReport> {
        let local = self.repository.metadata(game_id)?;

        if !client.exists(game_id).await? {
            self.push(client, &local).await?;
            let backups = self.push_all_backups(client, game_id).await;
            info!(id = game_id, name = %local.name, "new on remote, pushed");
            return Ok(GameSyncReport {
                outcome: SyncOutcome::Pushed,
                backups,
            });
        }

        let remote = client.metadata(game_id).await?;
        let backups = self.sync_backups(client, game_id).await;
        self.check_cancelled()?;

        let outcome = self.decide(client, local, remote, resolver).await?;
        Ok(GameSyncReport { outcome, backups })
    }

    async fn decide(
        &self,
        client: &dyn TransferClient,
        mut local: SaveRecord,
        remote: SaveRecord,
        resolver: &dyn ConflictResolver,
    ) -> Result<SyncOutcome> {
        let game_id = local.id.clone();

        if local.hash == remote.hash {
            if local.version == remote.version {
                debug!(id = %game_id, "already up to date");
                return Ok(SyncOutcome::UpToDate {
                    adopted_version: None,
                });
            }

            // Same content under another label: take the remote's number
            debug!(id = %game_id, local = local.version, remote = remote.version, "adopting remote version");
            local.version = remote.version;
            self.repository.write_metadata(&game_id, &local)?;
            return Ok(SyncOutcome::UpToDate {
                adopted_version: Some(remote.version),
            });
        }

        if local.version > remote.version {
            self.push(client, &local).await?;
            return Ok(SyncOutcome::Pushed);
        }

        if local.version < remote.version {
            self.pull(client, local, &remote, false).await?;
            return Ok(SyncOutcome::Pulled {
                version: remote.version,
            });
        }

        let info = ConflictInfo {
            game_id: game_id.clone(),
            name: local.name.clone(),
            version: local.version,
            local_date: local.date,
            remote_date: remote.date,
            local_hash: local.hash.clone(),
            remote_hash: remote.hash.clone(),
        };
        let resolution = resolver.resolve(&info);
        info!(id = %game_id, ?resolution, "conflict resolved");

        match resolution {
            Resolution::KeepLocal => self.push(client, &local).await?,
            // The local blob was never pushed: keep it in history
            Resolution::TakeRemote => self.pull(client, local, &remote, true).await?,
            Resolution::Abort => {}
        }

        Ok(SyncOutcome::Conflict { info, resolution })
    }

    async fn push(&self, client: &dyn TransferClient, local: &SaveRecord) -> Result<()> {
        let blob = self.repository.read_blob(&Identifier::game(&local.id))?;

        tokio::select! {
            pushed = client.push_save(local, blob) => pushed?,
            _ = self.cancel.cancelled() => return Err(SaveError::Cancelled),
        }

        debug!(id = %local.id, version = local.version, "pushed");
        Ok(())
    }

    /// Blob first, then the metadata that points at it. With `preserve`,
    /// the replaced blob is rotated into a backup once the download is
    /// complete.
    async fn pull(
        &self,
        client: &dyn TransferClient,
        mut local: SaveRecord,
        remote: &SaveRecord,
        preserve: bool,
    ) -> Result<()> {
        let mut writer = self.repository.write_blob(&Identifier::game(&local.id))?;

        tokio::select! {
            pulled = client.pull(&local.id, &mut writer) => pulled?,
            _ = self.cancel.cancelled() => return Err(SaveError::Cancelled),
        }

        if preserve {
            let scanner =
                Scanner::new(Arc::clone(&self.repository)).with_max_backups(self.max_backups);
            if let Some(backup_id) = scanner.rotate(&local.id)? {
                info!(id = %local.id, backup = %backup_id, "local save kept as backup");
            }
        }
        writer.commit()?;

        local.version = remote.version;
        local.date = remote.date;
        self.repository.write_metadata(&local.id, &local)?;

        debug!(id = %local.id, version = local.version, "pulled");
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SaveError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Reconcile every save that has a remote link.
    ///
    /// Each remote gets one heartbeat; when it fails, every save on that
    /// remote is reported unreachable and skipped. Any other failure only
    /// affects its own save.
    pub async fn sync_all(
        &self,
        connector: &dyn Connector,
        resolver: &dyn ConflictResolver,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut remotes: HashMap<String, std::result::Result<Arc<dyn TransferClient>, String>> =
            HashMap::new();

        for game_id in self.repository.list_games()? {
            if self.cancel.is_cancelled() {
                warn!("sync cancelled");
                report.cancelled = true;
                break;
            }

            let name = self
                .repository
                .metadata(&game_id)
                .map(|record| record.name)
                .unwrap_or_default();

            let status = match self.repository.remote(&game_id) {
                Ok(None) => SyncStatus::NoRemote,
                Ok(Some(link)) => {
                    if !remotes.contains_key(&link.url) {
                        let connected = self.heartbeat(connector, &link.url).await;
                        remotes.insert(link.url.clone(), connected);
                    }

                    match remotes.get(&link.url) {
                        Some(Ok(client)) => {
                            match self.sync_game(client.as_ref(), &game_id, resolver).await {
                                Ok(synced) => SyncStatus::Synced(synced),
                                Err(SaveError::Cancelled) => {
                                    report.cancelled = true;
                                    SyncStatus::Failed(SaveError::Cancelled)
                                }
                                Err(e) => {
                                    warn!(id = %game_id, error = %e, "sync failed");
                                    SyncStatus::Failed(e)
                                }
                            }
                        }
                        Some(Err(message)) => {
                            SyncStatus::Unreachable(SaveError::Remote(message.clone()))
                        }
                        None => SyncStatus::NoRemote,
                    }
                }
                Err(e) => SyncStatus::Failed(e),
            };

            report.entries.push(SyncEntry {
                game_id,
                name,
                status,
            });
        }

        Ok(report)
    }

    async fn heartbeat(
        &self,
        connector: &dyn Connector,
        url: &str,
    ) -> std::result::Result<Arc<dyn TransferClient>, String> {
        let client = connector.connect(url).map_err(|e| e.to_string())?;

        match client.ping().await {
            Ok(()) => {
                debug!(url, "remote reachable");
                Ok(client)
            }
            Err(e) => {
                warn!(url, error = %e, "remote unreachable, skipping its saves");
                Err(e.to_string())
            }
        }
    }
}
