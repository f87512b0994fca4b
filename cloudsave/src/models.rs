//! Records persisted by the repository and exchanged with the remote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Versioned identity of one tracked save directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRecord {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub version: u64,
    pub date: DateTime<Utc>,

    /// Content hash of the current blob. Derived on read, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl SaveRecord {
    /// A freshly registered record: version 1, no blob yet.
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            version: 1,
            date: Utc::now(),
            hash: None,
        }
    }

    /// Copy of this record with the derived hash stripped, as written to disk.
    pub fn without_hash(&self) -> Self {
        Self {
            hash: None,
            ..self.clone()
        }
    }
}

/// Immutable snapshot of a prior blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub uuid: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// Association between a save record and a remote server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLink {
    pub url: String,

    #[serde(skip)]
    pub game_id: String,
}

/// Build/runtime information reported by `GET /api/v1/version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    pub api_version: u32,
    pub os_name: String,
    pub os_architecture: String,
}
