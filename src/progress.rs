//! Durable crawl progress: the checkpoint and its store.
//!
//! Resume correctness lives here and nowhere else. The rest of the pipeline
//! asks two questions - "have I seen this record?" and "is this record
//! done?" - and the store answers them identically whether the run is fresh
//! or resumed after an interruption.
//!
//! Two artifacts on disk:
//!
//! - `checkpoint.json` - the full [`CrawlCheckpoint`], rewritten atomically
//!   (write-to-temp-then-rename) after each listing page.
//! - `completed.log` - an append-only list of record ids, one per line,
//!   flushed per record. Appending is much cheaper than rewriting the
//!   checkpoint, and a crash mid-record loses at most the in-flight record.
//!
//! `load()` replays the log into the checkpoint; `save()` folds the log's
//! contents in and truncates it. Replaying an already-folded id is a no-op,
//! so a crash between those two steps is harmless.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::RecordId;

/// Errors from checkpoint persistence.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// Filesystem error reading or writing a progress artifact.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file exists but does not parse.
    #[error("corrupt checkpoint at {path}: {detail}")]
    Corrupt {
        /// The checkpoint file.
        path: PathBuf,
        /// Parser diagnostic.
        detail: String,
    },
}

impl ProgressError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Durable snapshot of crawl and harvest progress.
///
/// `last_completed_page` only ever advances; `discovered` and `completed`
/// only ever grow. Ordered sets keep serialized output stable, which makes
/// checkpoint diffs and test assertions deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCheckpoint {
    /// Highest listing page fully processed and persisted.
    pub last_completed_page: u32,

    /// Every record id ever yielded by the walker.
    pub discovered: BTreeSet<RecordId>,

    /// Record ids whose harvest (metadata + image set) finished.
    pub completed: BTreeSet<RecordId>,

    /// Listing pages that exhausted retries; kept for the run summary and
    /// for a later retry pass.
    pub failed_pages: BTreeSet<u32>,
}

impl CrawlCheckpoint {
    /// Records a discovered id; returns true when it was previously unseen.
    pub fn insert_discovered(&mut self, id: RecordId) -> bool {
        self.discovered.insert(id)
    }

    /// True when the walker has already announced this id.
    #[must_use]
    pub fn is_discovered(&self, id: &RecordId) -> bool {
        self.discovered.contains(id)
    }

    /// True when the record's harvest already finished in a prior run.
    #[must_use]
    pub fn is_completed(&self, id: &RecordId) -> bool {
        self.completed.contains(id)
    }

    /// Advances the page cursor. Regressions are ignored: the cursor is
    /// monotonic by contract.
    pub fn advance_page(&mut self, page: u32) {
        if page > self.last_completed_page {
            self.last_completed_page = page;
        }
    }
}

/// Filesystem-backed store for the crawl checkpoint.
///
/// All writes are synchronous with respect to the caller; nothing is
/// batched or deferred. The store is the single writer for its files - the
/// internal mutex serializes appends from concurrent harvest workers.
#[derive(Debug)]
pub struct ProgressStore {
    checkpoint_path: PathBuf,
    log_path: PathBuf,
    /// Serializes appends to the completion log.
    log_lock: Mutex<()>,
}

impl ProgressStore {
    /// Creates a store rooted at the raw store directory.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            checkpoint_path: root.join("checkpoint.json"),
            log_path: root.join("completed.log"),
            log_lock: Mutex::new(()),
        }
    }

    /// Loads the checkpoint, replaying the completion log.
    ///
    /// A missing checkpoint yields the zero-value checkpoint (fresh run).
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Corrupt`] when the checkpoint file exists
    /// but does not parse, and [`ProgressError::Io`] for filesystem errors.
    pub fn load(&self) -> Result<CrawlCheckpoint, ProgressError> {
        let mut checkpoint = match fs::read(&self.checkpoint_path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| ProgressError::Corrupt {
                    path: self.checkpoint_path.clone(),
                    detail: e.to_string(),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no checkpoint found, starting fresh");
                CrawlCheckpoint::default()
            }
            Err(e) => return Err(ProgressError::io(&self.checkpoint_path, e)),
        };

        self.replay_log(&mut checkpoint)?;

        info!(
            last_completed_page = checkpoint.last_completed_page,
            discovered = checkpoint.discovered.len(),
            completed = checkpoint.completed.len(),
            "checkpoint loaded"
        );

        Ok(checkpoint)
    }

    /// Persists the checkpoint atomically and compacts the completion log.
    ///
    /// The log is first folded into the checkpoint (harvest workers may
    /// have appended completions since it was loaded), then the JSON is
    /// written to a sibling temp file and renamed into place, so a crash at
    /// any point leaves either the old or the new checkpoint, never a
    /// half-written one. The log lock is held across fold, write, and
    /// truncate so no concurrent append can slip between them.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] for filesystem errors.
    pub fn save(&self, checkpoint: &mut CrawlCheckpoint) -> Result<(), ProgressError> {
        let _guard = self.log_guard();
        self.replay_log(checkpoint)?;

        let json = serde_json::to_vec_pretty(checkpoint).map_err(|e| ProgressError::Corrupt {
            path: self.checkpoint_path.clone(),
            detail: e.to_string(),
        })?;

        let temp_path = self.checkpoint_path.with_extension("json.tmp");
        fs::write(&temp_path, &json).map_err(|e| ProgressError::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.checkpoint_path)
            .map_err(|e| ProgressError::io(&self.checkpoint_path, e))?;

        // The saved checkpoint now contains everything the log held. A crash
        // before the truncate only means a harmless replay on next load.
        if self.log_path.exists() {
            File::create(&self.log_path).map_err(|e| ProgressError::io(&self.log_path, e))?;
        }

        debug!(
            path = %self.checkpoint_path.display(),
            last_completed_page = checkpoint.last_completed_page,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Appends a completed record id to the log, flushed before returning.
    ///
    /// Deliberately does not rewrite the checkpoint: per-record completion
    /// is the hot path and must stay cheap.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] for filesystem errors.
    pub fn mark_record_complete(&self, id: &RecordId) -> Result<(), ProgressError> {
        let _guard = self.log_guard();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| ProgressError::io(&self.log_path, e))?;

        writeln!(file, "{id}").map_err(|e| ProgressError::io(&self.log_path, e))?;
        file.sync_data()
            .map_err(|e| ProgressError::io(&self.log_path, e))?;

        debug!(record_id = %id, "record marked complete");
        Ok(())
    }

    /// Removes both progress artifacts for a fresh (non-resuming) run.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] for filesystem errors other than the
    /// files already being absent.
    pub fn reset(&self) -> Result<(), ProgressError> {
        let _guard = self.log_guard();
        for path in [&self.checkpoint_path, &self.log_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ProgressError::io(path, e)),
            }
        }
        info!("progress artifacts cleared for fresh run");
        Ok(())
    }

    fn replay_log(&self, checkpoint: &mut CrawlCheckpoint) -> Result<(), ProgressError> {
        let contents = match fs::read_to_string(&self.log_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ProgressError::io(&self.log_path, e)),
        };

        let mut replayed = 0usize;
        for line in contents.lines() {
            let id = line.trim();
            if id.is_empty() {
                continue;
            }
            let id = RecordId::from(id);
            // Completion implies discovery; a log entry for an id missing
            // from the discovered set means the checkpoint write for its
            // page was lost, so repair it here.
            checkpoint.discovered.insert(id.clone());
            if checkpoint.completed.insert(id) {
                replayed += 1;
            }
        }

        if replayed > 0 {
            warn!(
                replayed,
                "completion log held records newer than the checkpoint; replayed"
            );
        }
        Ok(())
    }

    fn log_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned lock just means another thread panicked mid-append;
        // the log itself is still line-atomic.
        self.log_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
