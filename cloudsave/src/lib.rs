//! CloudSave library
//!
//! Versioned snapshots of game save directories, stored locally in a
//! repository and reconciled against a remote CloudSave server.

pub mod archive;
pub mod config;
pub mod fs;
pub mod models;
pub mod remote;
pub mod repository;
pub mod scanner;
pub mod service;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use models::{Backup, RemoteLink, SaveRecord};
pub use repository::{Identifier, Repository};
pub use utils::errors::SaveError;
pub type Result<T> = std::result::Result<T, SaveError>;
