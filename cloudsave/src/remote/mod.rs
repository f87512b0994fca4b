//! Remote side of reconciliation: the transfer contract, the wire envelope
//! shared with the server, and the HTTP implementation.

pub mod client;
pub mod progress;

pub use client::{HttpClient, HttpConnector};

use crate::models::{Backup, SaveRecord, ServerInfo};
use crate::utils::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::sync::Arc;

/// Current wire protocol revision
pub const API_VERSION: u32 = 1;

/// Multipart field names of blob uploads
pub mod fields {
    pub const PAYLOAD: &str = "payload";
    pub const NAME: &str = "name";
    pub const VERSION: &str = "version";
    pub const DATE: &str = "date";
    pub const PATH: &str = "path";
    pub const CREATED_AT: &str = "created_at";
}

/// Successful response body: `{status, timestamp, path, data}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: u16,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub data: T,
}

/// Error response body: `{status, timestamp, path, error, message}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status: u16,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub error: String,
    pub message: String,
}

/// Everything the reconciliation engine needs from a remote store.
///
/// Pushes hand over an open blob; pulls stream into `dest`, which is only
/// committed by the caller once the transfer completed.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Liveness and credentials check.
    async fn ping(&self) -> Result<()>;

    async fn version(&self) -> Result<ServerInfo>;

    async fn list_games(&self) -> Result<Vec<SaveRecord>>;

    async fn exists(&self, game_id: &str) -> Result<bool>;

    async fn metadata(&self, game_id: &str) -> Result<SaveRecord>;

    async fn list_backups(&self, game_id: &str) -> Result<Vec<String>>;

    async fn backup_info(&self, game_id: &str, backup_id: &str) -> Result<Backup>;

    async fn push_save(&self, record: &SaveRecord, blob: File) -> Result<()>;

    async fn push_backup(&self, game_id: &str, backup: &Backup, blob: File) -> Result<()>;

    async fn pull(&self, game_id: &str, dest: &mut (dyn Write + Send)) -> Result<()>;

    async fn pull_backup(
        &self,
        game_id: &str,
        backup_id: &str,
        dest: &mut (dyn Write + Send),
    ) -> Result<()>;
}

/// Hands out clients for remote URLs. Credential lookup lives here, not in
/// the engine.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> Result<Arc<dyn TransferClient>>;
}
