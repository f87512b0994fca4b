//! Filesystem helpers: directory walking, content hashing, atomic writes.

pub mod atomic;
pub mod hash;
pub mod walker;
