//! Change detection and archival of tracked save directories.

use crate::archive;
use crate::fs::walker;
use crate::repository::{Identifier, Repository};
use crate::utils::errors::{Result, SaveError};
use chrono::Utc;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Backups kept per save unless configured otherwise
pub const DEFAULT_MAX_BACKUPS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nothing was modified since the last scan
    Unchanged,
    /// A new blob was archived under this version
    Archived { version: u64 },
}

/// Turns modified save directories into new blob versions.
pub struct Scanner {
    repository: Arc<dyn Repository>,
    compression_level: i32,
    max_backups: usize,
}

impl Scanner {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            compression_level: archive::DEFAULT_COMPRESSION_LEVEL,
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    /// Archive `game_id` if anything under its directory changed since the
    /// last scan. On error nothing is bumped, the history is untouched and
    /// the marker stays put.
    pub fn scan(&self, game_id: &str) -> Result<ScanOutcome> {
        let started = Utc::now();
        let since = self.repository.last_scan(game_id)?;
        let mut record = self.repository.metadata(game_id)?;

        let changed = walker::changed_since(&record.path, since).map_err(|e| {
            SaveError::io(format!("[{}] failed to walk {}", game_id, record.path.display()), e)
        })?;
        if !changed {
            debug!(id = game_id, "no change since {}", since);
            return Ok(ScanOutcome::Unchanged);
        }

        let writer = self.repository.write_blob(&Identifier::game(game_id))?;
        let writer = archive::pack(&record.path, writer, self.compression_level)?;

        // The previous blob only moves to history once its successor is packed
        self.rotate(game_id)?;
        writer.commit()?;

        record.version += 1;
        record.date = Utc::now();
        self.repository.write_metadata(game_id, &record)?;
        // Files touched while packing must still look modified next time
        self.repository.reset_scan_at(game_id, started)?;

        info!(id = game_id, name = %record.name, version = record.version, "save archived");
        Ok(ScanOutcome::Archived {
            version: record.version,
        })
    }

    /// Scan every registered save, carrying on past individual failures.
    pub fn scan_all(&self) -> Result<Vec<(String, Result<ScanOutcome>)>> {
        let games = self.repository.list_games()?;

        Ok(games
            .into_iter()
            .map(|game_id| {
                let outcome = self.scan(&game_id);
                if let Err(e) = &outcome {
                    warn!(id = %game_id, error = %e, "scan failed");
                }
                (game_id, outcome)
            })
            .collect())
    }

    /// Copy the current blob into a fresh backup, then evict the oldest
    /// backups beyond the cap. Returns the new backup id, or `None` when
    /// there was no blob to preserve.
    pub fn rotate(&self, game_id: &str) -> Result<Option<String>> {
        let mut current = match self.repository.read_blob(&Identifier::game(game_id)) {
            Ok(file) => file,
            Err(SaveError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let backup_id = uuid::Uuid::new_v4().to_string();
        let id = Identifier::backup(game_id, &backup_id);

        let mut writer = self.repository.write_blob(&id)?;
        io::copy(&mut current, &mut writer)
            .map_err(|e| SaveError::io(format!("[{}] failed to copy blob", id), e))?;
        writer.set_modified(Utc::now());
        writer.commit()?;

        debug!(id = %id, "backup created");
        self.evict(game_id)?;
        Ok(Some(backup_id))
    }

    fn evict(&self, game_id: &str) -> Result<()> {
        let mut backups = Vec::new();
        for backup_id in self.repository.list_backups(game_id)? {
            backups.push(self.repository.backup_info(game_id, &backup_id)?);
        }

        // newest first
        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.uuid.cmp(&a.uuid))
        });

        for old in backups.into_iter().skip(self.max_backups) {
            self.repository.remove_backup(game_id, &old.uuid)?;
            tracing::info!("[Backup] Removed old backup {} of {}", old.uuid, game_id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Backup, RemoteLink, SaveRecord};
    use crate::repository::{BlobWriter, CachingRepository, DirectRepository};
    use chrono::{DateTime, Duration};
    use filetime::FileTime;
    use std::fs::{self, File};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Repository whose current blobs can never be rewritten, as when the
    /// disk fills up halfway through an archive.
    struct ReadOnlyBlobs(DirectRepository);

    impl Repository for ReadOnlyBlobs {
        fn ensure(&self, id: &Identifier) -> Result<()> {
            self.0.ensure(id)
        }
        fn list_games(&self) -> Result<Vec<String>> {
            self.0.list_games()
        }
        fn list_backups(&self, game_id: &str) -> Result<Vec<String>> {
            self.0.list_backups(game_id)
        }
        fn write_blob(&self, id: &Identifier) -> Result<BlobWriter> {
            match id {
                Identifier::Game(_) => Err(SaveError::io(
                    format!("[{}] failed to create blob", id),
                    io::Error::new(io::ErrorKind::Other, "no space left on device"),
                )),
                Identifier::Backup { .. } => self.0.write_blob(id),
            }
        }
        fn read_blob(&self, id: &Identifier) -> Result<File> {
            self.0.read_blob(id)
        }
        fn write_metadata(&self, game_id: &str, record: &SaveRecord) -> Result<()> {
            self.0.write_metadata(game_id, record)
        }
        fn metadata(&self, game_id: &str) -> Result<SaveRecord> {
            self.0.metadata(game_id)
        }
        fn backup_info(&self, game_id: &str, backup_id: &str) -> Result<Backup> {
            self.0.backup_info(game_id, backup_id)
        }
        fn set_remote(&self, game_id: &str, url: &str) -> Result<()> {
            self.0.set_remote(game_id, url)
        }
        fn remote(&self, game_id: &str) -> Result<Option<RemoteLink>> {
            self.0.remote(game_id)
        }
        fn remove(&self, game_id: &str) -> Result<()> {
            self.0.remove(game_id)
        }
        fn remove_backup(&self, game_id: &str, backup_id: &str) -> Result<()> {
            self.0.remove_backup(game_id, backup_id)
        }
        fn last_scan(&self, game_id: &str) -> Result<DateTime<Utc>> {
            self.0.last_scan(game_id)
        }
        fn reset_scan_at(&self, game_id: &str, at: DateTime<Utc>) -> Result<()> {
            self.0.reset_scan_at(game_id, at)
        }
        fn data_path(&self, id: &Identifier) -> PathBuf {
            self.0.data_path(id)
        }
    }

    fn touch(path: &Path, at: DateTime<Utc>) {
        let time = FileTime::from_unix_time(at.timestamp(), at.timestamp_subsec_nanos());
        filetime::set_file_mtime(path, time).unwrap();
    }

    fn setup(repository: Arc<dyn Repository>, temp_dir: &TempDir) -> PathBuf {
        let save_dir = temp_dir.path().join("saves").join("Celeste");
        fs::create_dir_all(&save_dir).unwrap();
        fs::write(save_dir.join("slot0.dat"), b"chapter 1").unwrap();

        repository
            .write_metadata("g1", &SaveRecord::new("g1", "Celeste", &save_dir))
            .unwrap();
        save_dir
    }

    #[test]
    fn test_first_scan_archives_and_bumps_version() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let repository: Arc<dyn Repository> =
            Arc::new(DirectRepository::open(temp_dir.path().join("datastore"))?);
        setup(repository.clone(), &temp_dir);
        let scanner = Scanner::new(repository.clone());

        assert_eq!(scanner.scan("g1")?, ScanOutcome::Archived { version: 2 });

        let record = repository.metadata("g1")?;
        assert_eq!(record.version, 2);
        assert!(record.hash.is_some());
        // nothing to back up on the first archive
        assert!(repository.list_backups("g1")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_unchanged_directory_is_noop() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let repository: Arc<dyn Repository> =
            Arc::new(DirectRepository::open(temp_dir.path().join("datastore"))?);
        let save_dir = setup(repository.clone(), &temp_dir);
        let scanner = Scanner::new(repository.clone());
        scanner.scan("g1")?;

        // Pin every mtime before the marker
        let past = Utc::now() - Duration::hours(1);
        touch(&save_dir.join("slot0.dat"), past);
        touch(&save_dir, past);

        let before = repository.metadata("g1")?;
        assert_eq!(scanner.scan("g1")?, ScanOutcome::Unchanged);
        assert_eq!(repository.metadata("g1")?, before);
        Ok(())
    }

    #[test]
    fn test_modified_file_triggers_new_version_and_backup() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let repository: Arc<dyn Repository> =
            Arc::new(CachingRepository::open(temp_dir.path().join("datastore"))?);
        let save_dir = setup(repository.clone(), &temp_dir);
        let scanner = Scanner::new(repository.clone());
        scanner.scan("g1")?;
        let first_hash = repository.metadata("g1")?.hash;

        fs::write(save_dir.join("slot0.dat"), b"chapter 2").unwrap();
        touch(&save_dir.join("slot0.dat"), Utc::now() + Duration::seconds(5));

        assert_eq!(scanner.scan("g1")?, ScanOutcome::Archived { version: 3 });

        let backups = repository.list_backups("g1")?;
        assert_eq!(backups.len(), 1);
        let backup = repository.backup_info("g1", &backups[0])?;
        assert_eq!(Some(backup.hash), first_hash);
        assert_ne!(repository.metadata("g1")?.hash, first_hash);
        Ok(())
    }

    #[test]
    fn test_missing_directory_fails_without_bump() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let repository: Arc<dyn Repository> =
            Arc::new(DirectRepository::open(temp_dir.path().join("datastore"))?);
        let save_dir = setup(repository.clone(), &temp_dir);
        fs::remove_dir_all(&save_dir).unwrap();

        let scanner = Scanner::new(repository.clone());
        assert!(scanner.scan("g1").is_err());
        assert_eq!(repository.metadata("g1")?.version, 1);
        assert_eq!(repository.last_scan("g1")?, DateTime::UNIX_EPOCH);
        Ok(())
    }

    #[test]
    fn test_failed_archive_keeps_history() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let datastore = temp_dir.path().join("datastore");
        let repository: Arc<dyn Repository> = Arc::new(DirectRepository::open(&datastore)?);
        let save_dir = setup(repository.clone(), &temp_dir);
        let scanner = Scanner::new(repository.clone());
        scanner.scan("g1")?;
        fs::write(save_dir.join("slot0.dat"), b"chapter 2").unwrap();
        touch(&save_dir.join("slot0.dat"), Utc::now() + Duration::seconds(5));
        scanner.scan("g1")?;

        let before = repository.metadata("g1")?;
        let history = repository.list_backups("g1")?;
        assert_eq!(history.len(), 1);
        let oldest = repository.backup_info("g1", &history[0])?;

        // More failing attempts than the rotation cap
        let broken: Arc<dyn Repository> =
            Arc::new(ReadOnlyBlobs(DirectRepository::open(&datastore)?));
        let failing = Scanner::new(broken);
        for attempt in 0..DEFAULT_MAX_BACKUPS + 2 {
            fs::write(save_dir.join("slot0.dat"), format!("attempt {}", attempt)).unwrap();
            touch(
                &save_dir.join("slot0.dat"),
                Utc::now() + Duration::seconds(10 + attempt as i64),
            );
            assert!(failing.scan("g1").is_err());
        }

        assert_eq!(repository.metadata("g1")?, before);
        assert_eq!(repository.list_backups("g1")?, history);
        assert_eq!(repository.backup_info("g1", &history[0])?, oldest);
        Ok(())
    }

    #[test]
    fn test_marker_is_taken_when_scan_starts() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let repository: Arc<dyn Repository> =
            Arc::new(DirectRepository::open(temp_dir.path().join("datastore"))?);
        let save_dir = setup(repository.clone(), &temp_dir);
        let scanner = Scanner::new(repository.clone());

        let started = Utc::now();
        scanner.scan("g1")?;
        let marker = repository.last_scan("g1")?;
        let record = repository.metadata("g1")?;
        assert!(marker >= started);
        assert!(marker <= record.date);

        // A write landing after the walk began is picked up by the next scan
        let during = marker + Duration::microseconds(1);
        touch(&save_dir, during - Duration::hours(1));
        fs::write(save_dir.join("slot0.dat"), b"chapter 1, checkpoint").unwrap();
        touch(&save_dir.join("slot0.dat"), during);
        assert_eq!(scanner.scan("g1")?, ScanOutcome::Archived { version: 3 });
        Ok(())
    }

    #[test]
    fn test_scan_all_isolates_failures() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let repository: Arc<dyn Repository> =
            Arc::new(DirectRepository::open(temp_dir.path().join("datastore"))?);
        setup(repository.clone(), &temp_dir);
        repository.write_metadata(
            "g0",
            &SaveRecord::new("g0", "Gone", temp_dir.path().join("missing")),
        )?;

        let results = Scanner::new(repository).scan_all()?;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "g0");
        assert!(results[0].1.is_err());
        assert_eq!(results[1].0, "g1");
        assert!(matches!(results[1].1, Ok(ScanOutcome::Archived { version: 2 })));
        Ok(())
    }

    #[test]
    fn test_rotation_keeps_six_newest() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let repository: Arc<dyn Repository> =
            Arc::new(CachingRepository::open(temp_dir.path().join("datastore"))?);
        setup(repository.clone(), &temp_dir);
        let scanner = Scanner::new(repository.clone());
        assert_eq!(scanner.rotate("g1")?, None);
        scanner.scan("g1")?;

        let mut created = Vec::new();
        for _ in 0..8 {
            let backup_id = scanner.rotate("g1")?.unwrap();
            created.push(backup_id);
        }

        let mut remaining = repository.list_backups("g1")?;
        remaining.sort();
        let mut newest: Vec<String> = created[2..].to_vec();
        newest.sort();
        assert_eq!(remaining, newest);
        Ok(())
    }
}
