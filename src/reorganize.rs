//! Final dataset layout: deterministic, human-browsable directories.
//!
//! Reorganization is a pure function of the cleaned raw store: records with
//! at least one kept image are laid out in id order as
//!
//! ```text
//! <output>/
//!   summary.json
//!   0001_<name>/
//!     info.json
//!     image_001.jpg
//!     image_002.png
//! ```
//!
//! Images are copied, never moved, so the raw store stays intact and the
//! stage can be re-run after further cleaning. Running it twice over the
//! same store produces the same tree.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{Record, RecordId, RecordMetadata};
use crate::raw_store::{self, RawStoreError};

/// Errors that abort reorganization.
#[derive(Debug, Error)]
pub enum ReorganizeError {
    /// The raw store could not be read.
    #[error(transparent)]
    RawStore(#[from] RawStoreError),

    /// Output tree filesystem failure.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ReorganizeError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// One record's placement in the final tree.
#[derive(Debug, Serialize)]
pub struct SummaryEntry {
    pub id: RecordId,
    pub directory: String,
    pub image_count: usize,
}

/// Top-level `summary.json` of the reorganized dataset.
#[derive(Debug, Default, Serialize)]
pub struct DatasetSummary {
    pub record_count: usize,
    pub image_count: usize,
    /// Entries in id order.
    pub records: Vec<SummaryEntry>,
}

/// Per-record `info.json` in the final tree: the record's metadata plus a
/// provenance map from final filename back to the source URL.
#[derive(Debug, Serialize)]
struct FinalRecordInfo<'a> {
    id: &'a RecordId,
    display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_url: Option<&'a str>,
    metadata: &'a RecordMetadata,
    /// Final filename -> original source URL.
    images: BTreeMap<String, String>,
}

/// Builds the final dataset tree at `output_root` from the cleaned raw
/// store at `raw_root`.
///
/// Records without a single kept image are skipped (and logged); they stay
/// visible in the raw store for auditing.
///
/// # Errors
///
/// Returns [`ReorganizeError`] on store read or output write failures.
pub fn run_reorganize(raw_root: &Path, output_root: &Path) -> Result<DatasetSummary, ReorganizeError> {
    let records = raw_store::load_records(raw_root)?;

    std::fs::create_dir_all(output_root).map_err(|e| ReorganizeError::io(output_root, e))?;

    let mut summary = DatasetSummary::default();
    let mut taken_names = BTreeSet::new();
    let mut index = 0usize;

    for record in &records {
        let kept: Vec<_> = record.kept_images().collect();
        if kept.is_empty() {
            debug!(record_id = %record.id, "no kept images, skipping");
            continue;
        }

        index += 1;
        let dir_name = directory_name(index, record, &mut taken_names);
        let record_dir = output_root.join(&dir_name);
        std::fs::create_dir_all(&record_dir).map_err(|e| ReorganizeError::io(&record_dir, e))?;

        let mut provenance = BTreeMap::new();
        let mut placed = 0usize;
        for image in &kept {
            let Some(src) = image.local_path.as_deref() else {
                warn!(record_id = %record.id, url = %image.source_url, "kept image has no local path, skipping");
                continue;
            };
            placed += 1;
            let filename = format!("image_{:03}.{}", placed, file_extension(src));
            let dest = record_dir.join(&filename);
            std::fs::copy(src, &dest).map_err(|e| ReorganizeError::io(&dest, e))?;
            provenance.insert(filename, image.source_url.clone());
        }

        let info = FinalRecordInfo {
            id: &record.id,
            display_name: &record.display_name,
            source_url: record.source_url.as_deref(),
            metadata: &record.metadata,
            images: provenance,
        };
        write_json(&record_dir.join("info.json"), &info)?;

        summary.records.push(SummaryEntry {
            id: record.id.clone(),
            directory: dir_name,
            image_count: placed,
        });
        summary.image_count += placed;
    }
    summary.record_count = summary.records.len();

    write_json(&output_root.join("summary.json"), &summary)?;

    info!(
        records = summary.record_count,
        images = summary.image_count,
        output = %output_root.display(),
        "dataset reorganized"
    );
    Ok(summary)
}

/// Picks the record's directory name, de-colliding with the raw id.
fn directory_name(index: usize, record: &Record, taken: &mut BTreeSet<String>) -> String {
    let base = sanitize_name(&record.display_name);
    let base = if base.is_empty() {
        record.id.as_str().to_string()
    } else {
        base
    };

    let mut name = format!("{index:04}_{base}");
    if !taken.insert(name.clone()) {
        name = format!("{index:04}_{base}_{}", record.id);
        taken.insert(name.clone());
    }
    name
}

/// Reduces a display name to a filesystem-safe slug.
///
/// Alphanumerics pass through lowercased; everything else collapses to a
/// single underscore. Multi-byte letters are kept as-is so non-ASCII names
/// remain recognizable.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn file_extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("jpg")
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ReorganizeError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| ReorganizeError::io(path, std::io::Error::other(e)))?;
    let temp = path.with_extension("json.tmp");
    std::fs::write(&temp, &json).map_err(|e| ReorganizeError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| ReorganizeError::io(path, e))?;
    Ok(())
}
