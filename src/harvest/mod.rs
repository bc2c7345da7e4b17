//! Entity harvester: turns discovered record ids into raw-store records.
//!
//! For each record the harvester fetches detail metadata, downloads the
//! full ordered image set, persists the record artifact, and marks the
//! record complete in the progress store - in that order, so completion is
//! never durable before the work it describes.
//!
//! Failure isolation is the rule: one bad record (permanent detail error,
//! every image failing) never aborts the run. It is persisted as-is, with
//! an empty or partial image list, counted in [`HarvestStats`], and the
//! run moves on. Only destination filesystem errors and checkpoint
//! persistence errors are fatal.

mod downloader;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub use downloader::{DownloadOutcome, ImageDownloader, content_hash, extension_for_url};

use crate::config::HarvestConfig;
use crate::crawl::{CrawlError, PaginationWalker, SequentialProbe};
use crate::model::{Record, RecordDetail, RecordId, RecordSummary};
use crate::net::{
    EndpointClient, FailureType, FetchError, RateLimiter, RetryDecision, RetryPolicy,
    classify_error,
};
use crate::progress::{ProgressError, ProgressStore};
use crate::raw_store::{self, RawStoreError};

/// Errors that abort the whole harvest run.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Destination filesystem failure; no forward progress is possible.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path involved.
        path: std::path::PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint persistence failed.
    #[error(transparent)]
    Progress(#[from] ProgressError),

    /// The crawl itself failed fatally.
    #[error(transparent)]
    Crawl(#[from] CrawlError),

    /// Raw store artifact could not be written.
    #[error(transparent)]
    RawStore(#[from] RawStoreError),

    /// The HTTP client could not be constructed at setup time.
    #[error(transparent)]
    Setup(#[from] FetchError),

    /// A harvest worker task panicked.
    #[error("harvest worker panicked: {0}")]
    WorkerPanic(String),
}

impl HarvestError {
    fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Run-scoped cancellation signal.
///
/// Set once (e.g. from a ctrl-c handler); in-flight work finishes its
/// current attempt and then stops, flushing the checkpoint before exit.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a graceful stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once a stop has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters for one harvest run, shared across worker tasks.
#[derive(Debug, Default)]
pub struct HarvestStats {
    records_attempted: AtomicUsize,
    records_completed: AtomicUsize,
    records_failed: AtomicUsize,
    images_attempted: AtomicUsize,
    images_downloaded: AtomicUsize,
    images_skipped: AtomicUsize,
    images_failed: AtomicUsize,
}

impl HarvestStats {
    /// Records whose harvest was started.
    #[must_use]
    pub fn records_attempted(&self) -> usize {
        self.records_attempted.load(Ordering::SeqCst)
    }

    /// Records fully harvested and marked complete.
    #[must_use]
    pub fn records_completed(&self) -> usize {
        self.records_completed.load(Ordering::SeqCst)
    }

    /// Records whose detail fetch failed permanently.
    #[must_use]
    pub fn records_failed(&self) -> usize {
        self.records_failed.load(Ordering::SeqCst)
    }

    /// Image downloads attempted (including resumes).
    #[must_use]
    pub fn images_attempted(&self) -> usize {
        self.images_attempted.load(Ordering::SeqCst)
    }

    /// Images downloaded over the network this run.
    #[must_use]
    pub fn images_downloaded(&self) -> usize {
        self.images_downloaded.load(Ordering::SeqCst)
    }

    /// Images skipped because they were already present (resume).
    #[must_use]
    pub fn images_skipped(&self) -> usize {
        self.images_skipped.load(Ordering::SeqCst)
    }

    /// Images that failed to download or were corrupt.
    #[must_use]
    pub fn images_failed(&self) -> usize {
        self.images_failed.load(Ordering::SeqCst)
    }

    /// Images present in the raw store after this run's work.
    #[must_use]
    pub fn images_available(&self) -> usize {
        self.images_downloaded() + self.images_skipped()
    }

    /// Emits the end-of-run summary; the run never ends silently.
    pub fn log_summary(&self) {
        info!(
            records_attempted = self.records_attempted(),
            records_completed = self.records_completed(),
            records_failed = self.records_failed(),
            images_attempted = self.images_attempted(),
            images_downloaded = self.images_downloaded(),
            images_skipped = self.images_skipped(),
            images_failed = self.images_failed(),
            "harvest summary"
        );
    }
}

/// Per-record harvest orchestrator.
///
/// Cheap to clone; clones share the client, rate gate, progress store, and
/// stats, which is how worker tasks get their handles.
#[derive(Clone)]
pub struct EntityHarvester {
    client: EndpointClient,
    downloader: ImageDownloader,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
    store: Arc<ProgressStore>,
    config: Arc<HarvestConfig>,
    stats: Arc<HarvestStats>,
    cancel: CancelFlag,
}

impl EntityHarvester {
    /// Creates a harvester wired to the run's shared components.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: EndpointClient,
        downloader: ImageDownloader,
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
        store: Arc<ProgressStore>,
        config: Arc<HarvestConfig>,
        stats: Arc<HarvestStats>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            client,
            downloader,
            rate_limiter,
            retry_policy,
            store,
            config,
            stats,
            cancel,
        }
    }

    /// Shared stats handle for this run.
    #[must_use]
    pub fn stats(&self) -> Arc<HarvestStats> {
        Arc::clone(&self.stats)
    }

    /// Harvests one record end to end.
    ///
    /// A permanent detail failure persists the record with an empty image
    /// list and still marks it complete - its harvest is finished, just
    /// unsuccessfully; retrying on the next resume would change nothing.
    ///
    /// # Errors
    ///
    /// Only fatal (filesystem / checkpoint) errors.
    pub async fn harvest_record(&self, summary: &RecordSummary) -> Result<(), HarvestError> {
        self.stats.records_attempted.fetch_add(1, Ordering::SeqCst);

        let detail = match self.fetch_detail_with_retry(&summary.id).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!(record_id = %summary.id, error = %e, "detail fetch failed, skipping record");
                self.stats.records_failed.fetch_add(1, Ordering::SeqCst);
                let record = empty_record(summary);
                raw_store::write_record(&self.config.output_root, &record)?;
                self.store.mark_record_complete(&summary.id)?;
                return Ok(());
            }
        };

        let image_urls = assemble_image_urls(summary, &detail);
        let record_dir = raw_store::record_dir(&self.config.output_root, &summary.id);
        std::fs::create_dir_all(&record_dir).map_err(|e| HarvestError::io(&record_dir, e))?;

        let mut images = Vec::with_capacity(image_urls.len());
        let mut interrupted = false;
        for (index, url) in image_urls.iter().enumerate() {
            if self.cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let filename = format!("image_{:03}.{}", index + 1, extension_for_url(url));
            let dest = record_dir.join(filename);

            self.stats.images_attempted.fetch_add(1, Ordering::SeqCst);
            let outcome = self.downloader.download(url, &dest).await?;

            match outcome.image.status {
                crate::model::ImageStatus::Downloaded if outcome.resumed => {
                    self.stats.images_skipped.fetch_add(1, Ordering::SeqCst);
                }
                crate::model::ImageStatus::Downloaded => {
                    self.stats.images_downloaded.fetch_add(1, Ordering::SeqCst);
                }
                _ => {
                    self.stats.images_failed.fetch_add(1, Ordering::SeqCst);
                }
            }
            images.push(outcome.image);
        }

        let display_name = if detail.display_name.is_empty() {
            summary.display_name.clone()
        } else {
            detail.display_name.clone()
        };

        let record = Record {
            id: summary.id.clone(),
            display_name,
            source_url: summary.detail_url.clone(),
            metadata: detail.metadata,
            images,
        };

        // Persisted even when every image failed: the raw store stays a
        // complete, inspectable account of what was attempted.
        raw_store::write_record(&self.config.output_root, &record)?;

        if interrupted {
            // Not marked complete: the resume finishes the remaining images.
            debug!(record_id = %record.id, "record interrupted by cancellation");
            return Ok(());
        }

        self.store.mark_record_complete(&record.id)?;
        self.stats.records_completed.fetch_add(1, Ordering::SeqCst);
        debug!(record_id = %record.id, images = record.images.len(), "record harvested");
        Ok(())
    }

    async fn fetch_detail_with_retry(&self, id: &RecordId) -> Result<RecordDetail, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.rate_limiter
                .acquire(self.client.base_url().as_str())
                .await;

            match self.client.fetch_detail(id).await {
                Ok(detail) => return Ok(detail),
                Err(e) => {
                    let failure_type = classify_error(&e);
                    if failure_type == FailureType::RateLimited {
                        if let Some(delay) = e.retry_after_delay() {
                            self.rate_limiter
                                .record_rate_limit(self.client.base_url().as_str(), delay)
                                .await;
                        }
                    }
                    match self.retry_policy.should_retry(failure_type, attempt) {
                        RetryDecision::Retry { delay, attempt } => {
                            warn!(
                                record_id = %id,
                                attempt,
                                delay_ms = delay.as_millis(),
                                error = %e,
                                "retrying detail fetch"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(record_id = %id, %reason, "not retrying detail fetch");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// True once the configured image budget is met.
    fn image_target_reached(&self) -> bool {
        match self.config.target_images {
            Some(target) => self.stats.images_available() as u64 >= target,
            None => false,
        }
    }
}

/// Record persisted when the detail fetch failed permanently.
fn empty_record(summary: &RecordSummary) -> Record {
    Record {
        id: summary.id.clone(),
        display_name: summary.display_name.clone(),
        source_url: summary.detail_url.clone(),
        metadata: crate::model::RecordMetadata::default(),
        images: Vec::new(),
    }
}

/// Merges the listing's lead image with the detail page's ordered list,
/// lead first, preserving order and dropping duplicates.
fn assemble_image_urls(summary: &RecordSummary, detail: &RecordDetail) -> Vec<String> {
    let mut urls = Vec::with_capacity(detail.image_urls.len() + 1);
    if let Some(lead) = &summary.lead_image_url {
        urls.push(lead.clone());
    }
    for url in &detail.image_urls {
        if !urls.contains(url) {
            urls.push(url.clone());
        }
    }
    urls
}

/// Runs the full discover-and-harvest loop for one configuration.
///
/// Drives the pagination walker, dispatches each batch to a bounded worker
/// pool, and flushes the checkpoint after every batch. A resumed run first
/// works off the backlog of discovered-but-incomplete records before
/// walking new pages.
///
/// # Errors
///
/// Only fatal errors (setup, destination filesystem, checkpoint); per-unit
/// failures are absorbed into the stats.
pub async fn run_harvest(
    config: Arc<HarvestConfig>,
    fresh: bool,
    cancel: CancelFlag,
) -> Result<Arc<HarvestStats>, HarvestError> {
    let store = Arc::new(ProgressStore::new(&config.output_root));
    if fresh {
        store.reset()?;
    }

    let client = EndpointClient::new(&config)?;
    let rate_limiter = Arc::new(if config.rate_limit_ms == 0 {
        RateLimiter::disabled()
    } else {
        RateLimiter::new(std::time::Duration::from_millis(config.rate_limit_ms))
    });
    let retry_policy = RetryPolicy::with_max_attempts(config.max_attempts);

    let downloader = ImageDownloader::new(
        client.clone(),
        Arc::clone(&rate_limiter),
        retry_policy.clone(),
    );
    let stats = Arc::new(HarvestStats::default());
    let harvester = EntityHarvester::new(
        client.clone(),
        downloader,
        Arc::clone(&rate_limiter),
        retry_policy.clone(),
        Arc::clone(&store),
        Arc::clone(&config),
        Arc::clone(&stats),
        cancel.clone(),
    );

    let mut checkpoint = store.load()?;

    // Backlog: records discovered in a previous run whose harvest never
    // finished. The walker will not announce them again.
    let backlog: Vec<RecordSummary> = checkpoint
        .discovered
        .iter()
        .filter(|id| !checkpoint.is_completed(id))
        .map(|id| RecordSummary {
            id: id.clone(),
            display_name: String::new(),
            detail_url: None,
            lead_image_url: None,
        })
        .collect();

    if !backlog.is_empty() {
        info!(backlog = backlog.len(), "resuming incomplete records");
        harvest_batch(&harvester, backlog, config.concurrency).await?;
        store.save(&mut checkpoint)?;
    }

    let fallback = Box::new(SequentialProbe::new(
        client.clone(),
        Arc::clone(&rate_limiter),
    ));
    let mut walker = PaginationWalker::new(
        &client,
        &rate_limiter,
        &retry_policy,
        &store,
        &config,
        &checkpoint,
        Some(fallback),
    );

    while !cancel.is_cancelled() && !harvester.image_target_reached() {
        let Some(batch) = walker.next_batch(&mut checkpoint).await? else {
            break;
        };

        harvest_batch(&harvester, batch, config.concurrency).await?;
        store.save(&mut checkpoint)?;
    }

    // Final flush covers completions from the last batch and any partial
    // progress before a cancellation.
    store.save(&mut checkpoint)?;

    if cancel.is_cancelled() {
        info!("harvest stopped by cancellation; checkpoint flushed");
    } else if let Some(reason) = walker.stop_reason() {
        info!(?reason, "harvest walk finished");
    }

    stats.log_summary();
    Ok(stats)
}

/// Dispatches one batch of records to a semaphore-bounded worker pool and
/// waits for all of them.
async fn harvest_batch(
    harvester: &EntityHarvester,
    batch: Vec<RecordSummary>,
    concurrency: usize,
) -> Result<(), HarvestError> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(batch.len());

    for summary in batch {
        if harvester.cancel.is_cancelled() || harvester.image_target_reached() {
            break;
        }

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break; // Semaphore closed; nothing more to schedule.
        };
        let worker = harvester.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            worker.harvest_record(&summary).await
        }));
    }

    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "harvest worker failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(join_error) => {
                warn!(error = %join_error, "harvest worker panicked");
                if first_error.is_none() {
                    first_error = Some(HarvestError::WorkerPanic(join_error.to_string()));
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
