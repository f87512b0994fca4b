//! Error types shared by the repository, archive codec and sync engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SaveError {
    /// A save record or backup does not exist (locally or on the remote).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A persisted record could not be parsed.
    #[error("Corrupted datastore: {0}")]
    Corrupted(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote answered, but not with what the protocol expects.
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Some records of a multi-record pass failed; each one was reported individually.
    #[error("{failed} of {total} saves failed")]
    PartialFailure { failed: usize, total: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SaveError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SaveError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupted(context: impl std::fmt::Display, source: impl std::fmt::Display) -> Self {
        SaveError::Corrupted(format!("{}: {}", context, source))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SaveError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, SaveError>;
