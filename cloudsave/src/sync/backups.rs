//! Bidirectional backup history reconciliation.
//!
//! Every UUID known to either side is compared by hash. Missing remotely:
//! push. Missing locally, or present on both sides with different content:
//! pull, the remote copy wins. Failures are per backup and never abort the
//! rest of the pass.

use super::Reconciler;
use crate::models::Backup;
use crate::remote::TransferClient;
use crate::repository::Identifier;
use crate::utils::errors::{Result, SaveError};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupSyncReport {
    pub pushed: Vec<String>,
    pub pulled: Vec<String>,
    pub failed: Vec<String>,
}

impl BackupSyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum BackupAction {
    Push(Backup),
    Pull(Backup),
    Nothing,
}

impl Reconciler {
    /// Push every local backup; used when the remote has no record yet.
    pub(crate) async fn push_all_backups(
        &self,
        client: &dyn TransferClient,
        game_id: &str,
    ) -> BackupSyncReport {
        let mut report = BackupSyncReport::default();

        let backup_ids = match self.repository.list_backups(game_id) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(id = game_id, error = %e, "cannot list local backups");
                return report;
            }
        };

        for backup_id in backup_ids {
            let pushed = match self.repository.backup_info(game_id, &backup_id) {
                Ok(backup) => self.push_backup(client, game_id, &backup).await,
                Err(e) => Err(e),
            };
            record(&mut report, game_id, backup_id, pushed, true);
        }

        report
    }

    /// Reconcile the backup history of a save present on both sides.
    pub(crate) async fn sync_backups(
        &self,
        client: &dyn TransferClient,
        game_id: &str,
    ) -> BackupSyncReport {
        let mut report = BackupSyncReport::default();

        let local = match self.repository.list_backups(game_id) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(id = game_id, error = %e, "cannot list local backups");
                return report;
            }
        };
        let remote = match client.list_backups(game_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(id = game_id, error = %e, "cannot list remote backups");
                return report;
            }
        };

        let local_ids: BTreeSet<String> = local.into_iter().collect();
        let remote_ids: BTreeSet<String> = remote.into_iter().collect();

        for backup_id in local_ids.union(&remote_ids) {
            if self.cancel.is_cancelled() {
                break;
            }

            let action = self
                .backup_action(
                    client,
                    game_id,
                    backup_id,
                    local_ids.contains(backup_id),
                    remote_ids.contains(backup_id),
                )
                .await;

            match action {
                Ok(BackupAction::Push(backup)) => {
                    let pushed = self.push_backup(client, game_id, &backup).await;
                    record(&mut report, game_id, backup_id.clone(), pushed, true);
                }
                Ok(BackupAction::Pull(backup)) => {
                    let pulled = self.pull_backup(client, game_id, &backup).await;
                    record(&mut report, game_id, backup_id.clone(), pulled, false);
                }
                Ok(BackupAction::Nothing) => {}
                Err(e) => record(&mut report, game_id, backup_id.clone(), Err(e), false),
            }
        }

        report
    }

    async fn backup_action(
        &self,
        client: &dyn TransferClient,
        game_id: &str,
        backup_id: &str,
        is_local: bool,
        is_remote: bool,
    ) -> Result<BackupAction> {
        let local = if is_local {
            Some(self.repository.backup_info(game_id, backup_id)?)
        } else {
            None
        };
        let remote = if is_remote {
            Some(client.backup_info(game_id, backup_id).await?)
        } else {
            None
        };

        Ok(match (local, remote) {
            (Some(local), None) => BackupAction::Push(local),
            (None, Some(remote)) => BackupAction::Pull(remote),
            (Some(local), Some(remote)) if local.hash != remote.hash => BackupAction::Pull(remote),
            _ => BackupAction::Nothing,
        })
    }

    async fn push_backup(
        &self,
        client: &dyn TransferClient,
        game_id: &str,
        backup: &Backup,
    ) -> Result<()> {
        let blob = self
            .repository
            .read_blob(&Identifier::backup(game_id, &backup.uuid))?;

        tokio::select! {
            pushed = client.push_backup(game_id, backup, blob) => pushed,
            _ = self.cancel.cancelled() => Err(SaveError::Cancelled),
        }
    }

    async fn pull_backup(
        &self,
        client: &dyn TransferClient,
        game_id: &str,
        backup: &Backup,
    ) -> Result<()> {
        let mut writer = self
            .repository
            .write_blob(&Identifier::backup(game_id, &backup.uuid))?;

        tokio::select! {
            pulled = client.pull_backup(game_id, &backup.uuid, &mut writer) => pulled?,
            _ = self.cancel.cancelled() => return Err(SaveError::Cancelled),
        }

        writer.set_modified(backup.created_at);
        writer.commit()
    }
}

fn record(
    report: &mut BackupSyncReport,
    game_id: &str,
    backup_id: String,
    result: Result<()>,
    push: bool,
) {
    match result {
        Ok(()) if push => {
            debug!(id = game_id, backup = %backup_id, "backup pushed");
            report.pushed.push(backup_id);
        }
        Ok(()) => {
            debug!(id = game_id, backup = %backup_id, "backup pulled");
            report.pulled.push(backup_id);
        }
        Err(e) => {
            warn!(id = game_id, backup = %backup_id, error = %e, "backup sync failed");
            report.failed.push(backup_id);
        }
    }
}
