//! Durable JSON files
//!
//! Writes go to a uniquely named temp file in the target's directory that is
//! then persisted over the target, so a crash mid-write never leaves a
//! truncated record behind.

use crate::error::PersistenceError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Serialize `value` as pretty JSON and atomically replace `path`
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let json = serde_json::to_vec_pretty(value)?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // Dropping the temp file on an early return removes it
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(&json)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let contents = fs::read(path)?;
    Ok(serde_json::from_slice(&contents)?)
}
