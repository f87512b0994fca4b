//! Content fingerprints of blob streams.
//!
//! Two blobs are considered identical iff their fingerprints are equal, so
//! the hash must be stable across processes and machines: BLAKE3 over the raw
//! bytes, rendered as lowercase hex.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Hash everything readable from `reader`.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// Hash the content of a file on disk.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    hash_reader(io::BufReader::new(file))
}
