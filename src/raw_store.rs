//! Raw store layout: one directory per record id under the store root.
//!
//! ```text
//! <root>/
//!   checkpoint.json      (progress store)
//!   completed.log        (progress store)
//!   <record_id>/
//!     info.json          (serialized Record)
//!     image_001.jpg
//!     image_002.png
//! ```
//!
//! Readers get records sorted by id so every downstream stage traverses in
//! the same deterministic order.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Record, RecordId};

/// Per-record metadata artifact filename.
pub const INFO_FILE: &str = "info.json";

/// Errors reading or writing the raw store.
#[derive(Debug, Error)]
pub enum RawStoreError {
    /// Filesystem error under the store root.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A record artifact exists but does not parse.
    #[error("corrupt record artifact at {path}: {detail}")]
    Corrupt {
        /// The artifact file.
        path: PathBuf,
        /// Parser diagnostic.
        detail: String,
    },
}

impl RawStoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Directory holding a record's images and `info.json`.
#[must_use]
pub fn record_dir(root: &Path, id: &RecordId) -> PathBuf {
    root.join(id.as_str())
}

/// Writes a record's `info.json` atomically (temp-write then rename),
/// creating the record directory if needed.
///
/// # Errors
///
/// Returns [`RawStoreError::Io`] for filesystem failures.
pub fn write_record(root: &Path, record: &Record) -> Result<(), RawStoreError> {
    let dir = record_dir(root, &record.id);
    std::fs::create_dir_all(&dir).map_err(|e| RawStoreError::io(&dir, e))?;

    let json = serde_json::to_vec_pretty(record).map_err(|e| RawStoreError::Corrupt {
        path: dir.join(INFO_FILE),
        detail: e.to_string(),
    })?;

    let final_path = dir.join(INFO_FILE);
    let temp_path = dir.join("info.json.tmp");
    std::fs::write(&temp_path, &json).map_err(|e| RawStoreError::io(&temp_path, e))?;
    std::fs::rename(&temp_path, &final_path).map_err(|e| RawStoreError::io(&final_path, e))?;

    debug!(record_id = %record.id, path = %final_path.display(), "record persisted");
    Ok(())
}

/// Loads every record in the store, sorted by record id.
///
/// Directories without an `info.json` (e.g. a record interrupted before
/// its first persist) are skipped with a warning rather than failing the
/// whole pass.
///
/// # Errors
///
/// Returns [`RawStoreError`] when the root cannot be read or an existing
/// artifact is corrupt.
pub fn load_records(root: &Path) -> Result<Vec<Record>, RawStoreError> {
    let mut records = Vec::new();

    let entries = std::fs::read_dir(root).map_err(|e| RawStoreError::io(root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| RawStoreError::io(root, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let info_path = path.join(INFO_FILE);
        let bytes = match std::fs::read(&info_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(dir = %path.display(), "record directory without info.json, skipping");
                continue;
            }
            Err(e) => return Err(RawStoreError::io(&info_path, e)),
        };

        let record: Record =
            serde_json::from_slice(&bytes).map_err(|e| RawStoreError::Corrupt {
                path: info_path.clone(),
                detail: e.to_string(),
            })?;
        records.push(record);
    }

    records.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(records)
}
