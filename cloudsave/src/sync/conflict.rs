//! Conflict decision point: both sides moved to the same version with
//! different content.

use crate::config::ConflictPolicy;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Both sides of a conflicting save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictInfo {
    pub game_id: String,
    pub name: String,
    pub version: u64,
    pub local_date: DateTime<Utc>,
    pub remote_date: DateTime<Utc>,
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Resolution {
    /// Push the local blob over the remote one
    KeepLocal,
    /// Pull the remote blob and adopt its version and date
    TakeRemote,
    /// Leave both sides untouched
    Abort,
}

/// Supplies the choice for a conflict. The engine itself never prompts.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflict: &ConflictInfo) -> Resolution;
}

/// Answers every conflict the same way.
#[derive(Debug, Clone, Copy)]
pub struct PolicyResolver(pub Resolution);

impl PolicyResolver {
    /// Non-interactive resolver for a configured policy; `prompt` has no
    /// terminal here and degrades to `abort`.
    pub fn from_policy(policy: ConflictPolicy) -> Self {
        match policy {
            ConflictPolicy::Local => PolicyResolver(Resolution::KeepLocal),
            ConflictPolicy::Remote => PolicyResolver(Resolution::TakeRemote),
            ConflictPolicy::Abort | ConflictPolicy::Prompt => PolicyResolver(Resolution::Abort),
        }
    }
}

impl ConflictResolver for PolicyResolver {
    fn resolve(&self, _conflict: &ConflictInfo) -> Resolution {
        self.0
    }
}
