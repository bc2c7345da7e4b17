//! Dataset cleaning: an ordered filter pipeline over the raw store.
//!
//! Stages run per image, cheapest first: structural checks (byte size,
//! dimensions, aspect ratio), exact-content deduplication, then subject
//! classification. The first stage to reject an image records its reason
//! and later stages never see it.
//!
//! Cleaning mutates `info.json` verdicts only - image bytes stay on disk,
//! so the raw store remains a complete account and a re-run with the same
//! configuration is a no-op. Traversal order is deterministic (record id,
//! then image position), which pins which copy of a duplicate survives.

mod classifier;
mod dedup;
mod structural;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use classifier::{Classification, ClassifierError, FixedClassifier, SubjectClassifier};
pub use dedup::DedupIndex;
pub use structural::{probe_dimensions, structural_reject};

use crate::config::CleanConfig;
use crate::harvest::content_hash;
use crate::model::{ImageStatus, Record, RecordId, RejectReason};
use crate::raw_store::{self, RawStoreError};

/// Errors that abort a cleaning pass.
#[derive(Debug, Error)]
pub enum CleanError {
    /// The raw store could not be read or rewritten.
    #[error(transparent)]
    RawStore(#[from] RawStoreError),
}

/// Outcome of one cleaning pass, suitable for serialization.
///
/// Maps are keyed by stable labels so two passes over the same store with
/// the same configuration serialize byte-identically.
#[derive(Debug, Default, Serialize)]
pub struct CleaningReport {
    /// Records visited.
    pub records_examined: usize,
    /// Downloaded images the pipeline looked at.
    pub images_considered: usize,
    /// Images that passed every stage.
    pub images_kept: usize,
    /// Rejection counts per reason label.
    pub images_rejected: BTreeMap<String, usize>,
    /// Downloaded images whose file was missing or unreadable.
    pub images_unreadable: usize,
    /// Records left with zero kept images, in id order.
    pub records_emptied: Vec<RecordId>,
}

impl CleaningReport {
    /// Total rejections across all reasons.
    #[must_use]
    pub fn total_rejected(&self) -> usize {
        self.images_rejected.values().sum()
    }

    fn count_reject(&mut self, reason: RejectReason) {
        *self
            .images_rejected
            .entry(reason.label().to_string())
            .or_insert(0) += 1;
    }

    /// Emits the end-of-pass summary.
    pub fn log_summary(&self) {
        info!(
            records_examined = self.records_examined,
            images_considered = self.images_considered,
            images_kept = self.images_kept,
            images_rejected = self.total_rejected(),
            images_unreadable = self.images_unreadable,
            records_emptied = self.records_emptied.len(),
            "cleaning summary"
        );
    }
}

/// Runs the full cleaning pipeline over the raw store at `root`.
///
/// Only images in [`ImageStatus::Downloaded`] are examined; earlier
/// verdicts (failed downloads, prior rejections) are left untouched, which
/// is what makes repeated passes idempotent.
///
/// # Errors
///
/// Returns [`CleanError`] when the store cannot be read or a record's
/// verdicts cannot be rewritten.
pub fn run_clean(
    root: &Path,
    config: &CleanConfig,
    classifier: &dyn SubjectClassifier,
) -> Result<CleaningReport, CleanError> {
    let mut records = raw_store::load_records(root)?;
    let mut report = CleaningReport::default();
    let mut dedup = DedupIndex::new();

    for record in &mut records {
        report.records_examined += 1;
        let changed = clean_record(record, config, classifier, &mut dedup, &mut report);

        if changed {
            raw_store::write_record(root, record)?;
        }
        if record.is_emptied() {
            report.records_emptied.push(record.id.clone());
        }
    }

    report.log_summary();
    Ok(report)
}

/// Cleans one record in place; true when any verdict changed.
fn clean_record(
    record: &mut Record,
    config: &CleanConfig,
    classifier: &dyn SubjectClassifier,
    dedup: &mut DedupIndex,
    report: &mut CleaningReport,
) -> bool {
    let mut changed = false;

    for image in &mut record.images {
        if image.status != ImageStatus::Downloaded {
            continue;
        }
        report.images_considered += 1;

        let Some(path) = image.local_path.clone() else {
            warn!(record_id = %record.id, url = %image.source_url, "downloaded image has no local path");
            report.images_unreadable += 1;
            image.status = ImageStatus::Failed;
            image.failure = Some("missing local path".to_string());
            changed = true;
            continue;
        };

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(record_id = %record.id, path = %path.display(), error = %e, "image file unreadable");
                report.images_unreadable += 1;
                image.status = ImageStatus::Failed;
                image.failure = Some(format!("unreadable file: {e}"));
                changed = true;
                continue;
            }
        };

        match image_verdict(config, classifier, dedup, &bytes) {
            Verdict::Keep => {
                if image.content_hash.is_none() {
                    image.content_hash = Some(content_hash(&bytes));
                    changed = true;
                }
                report.images_kept += 1;
            }
            Verdict::Reject(reason) => {
                debug!(record_id = %record.id, path = %path.display(), %reason, "image rejected");
                image.reject(reason);
                report.count_reject(reason);
                changed = true;
            }
            Verdict::Unreadable(detail) => {
                warn!(record_id = %record.id, path = %path.display(), %detail, "image undecodable");
                report.images_unreadable += 1;
                image.status = ImageStatus::Failed;
                image.failure = Some(detail);
                changed = true;
            }
        }
    }

    changed
}

enum Verdict {
    Keep,
    Reject(RejectReason),
    Unreadable(String),
}

/// Runs the stage sequence on one image's bytes.
fn image_verdict(
    config: &CleanConfig,
    classifier: &dyn SubjectClassifier,
    dedup: &mut DedupIndex,
    bytes: &[u8],
) -> Verdict {
    let (width, height) = match probe_dimensions(bytes) {
        Ok(dims) => dims,
        Err(detail) => return Verdict::Unreadable(detail),
    };

    if let Some(reason) = structural_reject(config, bytes.len() as u64, width, height) {
        return Verdict::Reject(reason);
    }

    if !dedup.insert(&content_hash(bytes)) {
        return Verdict::Reject(RejectReason::DuplicateContent);
    }

    match classifier.classify(bytes) {
        Ok(verdict) => {
            if !verdict.is_target_subject {
                Verdict::Reject(RejectReason::NotTargetSubject)
            } else if verdict.confidence < config.confidence_threshold {
                Verdict::Reject(RejectReason::LowConfidence)
            } else {
                Verdict::Keep
            }
        }
        Err(e) if config.strict_classifier => {
            debug!(error = %e, "classifier inconclusive, strict mode rejects");
            Verdict::Reject(RejectReason::ClassifierInconclusive)
        }
        Err(e) => {
            debug!(error = %e, "classifier inconclusive, lenient mode keeps");
            Verdict::Keep
        }
    }
}
