//! Utility modules for the CloudSave client.

pub mod errors;
pub mod logger;
pub mod shutdown;

pub use errors::{Result, SaveError};
