//! Pagination walker: drives the crawl over listing pages.
//!
//! The walker is a state machine over a single page cursor. Each step
//! fetches one listing page, extracts record summaries, deduplicates them
//! against the checkpoint, and persists the checkpoint *before* yielding -
//! so a crash after a yield can re-fetch a page (idempotent, ids are
//! deduplicated) but can never re-announce already-yielded records as new.
//!
//! Upstream pagination is not trusted to behave. When the monotonic cursor
//! it reports stops advancing for two consecutive pages, or the same
//! zero-new-record page repeats, the walker declares a stall and switches
//! to the fallback [`DiscoveryStrategy`] (sequential id probing) instead of
//! looping forever.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::model::{ListingPage, RecordId, RecordSummary};
use crate::net::{
    EndpointClient, FailureType, FetchError, RateLimiter, RetryDecision, RetryPolicy,
    classify_error,
};
use crate::progress::{CrawlCheckpoint, ProgressError, ProgressStore};

/// Consecutive non-advancing or zero-new pages tolerated before a stall is
/// declared.
const STALL_THRESHOLD: u32 = 2;

/// Consecutive fallback probe misses tolerated before the id space is
/// considered exhausted.
const PROBE_MISS_LIMIT: u32 = 10;

/// Errors that abort the crawl.
///
/// Page fetch failures are recovered locally (the page lands in
/// `failed_pages` and the walk continues); only checkpoint persistence
/// failures surface here, because resume correctness is gone without it.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Checkpoint could not be loaded or saved.
    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// Alternate record discovery used when pagination stalls.
///
/// Object-safe so the walker can hold whichever strategy the run
/// configures without knowing its concrete type.
#[async_trait]
pub trait DiscoveryStrategy: Send {
    /// Produces the next batch of candidate records, or an empty batch when
    /// the strategy is exhausted. Candidates may include already-discovered
    /// ids; the walker deduplicates.
    async fn next_candidates(&mut self, checkpoint: &CrawlCheckpoint) -> Vec<RecordSummary>;
}

/// Fallback discovery that probes sequential record ids directly.
///
/// Record ids on the upstream catalog are dense ascending integers, so
/// probing upward from the highest known id recovers records that broken
/// pagination never surfaced. A probe is one detail fetch; a hit becomes a
/// candidate, and a run of consecutive misses ends the strategy.
pub struct SequentialProbe {
    client: EndpointClient,
    rate_limiter: std::sync::Arc<RateLimiter>,
    /// Next id to probe; initialized from the checkpoint on first use.
    cursor: Option<u64>,
    consecutive_misses: u32,
    batch_size: u32,
}

impl SequentialProbe {
    /// Creates a probe strategy sharing the run's client and rate gate.
    #[must_use]
    pub fn new(client: EndpointClient, rate_limiter: std::sync::Arc<RateLimiter>) -> Self {
        Self {
            client,
            rate_limiter,
            cursor: None,
            consecutive_misses: 0,
            batch_size: 5,
        }
    }

    /// Highest numeric id in the discovered set, if any are numeric.
    fn highest_known_id(checkpoint: &CrawlCheckpoint) -> Option<u64> {
        checkpoint
            .discovered
            .iter()
            .filter_map(|id| id.as_str().parse::<u64>().ok())
            .max()
    }
}

#[async_trait]
impl DiscoveryStrategy for SequentialProbe {
    async fn next_candidates(&mut self, checkpoint: &CrawlCheckpoint) -> Vec<RecordSummary> {
        if self.consecutive_misses >= PROBE_MISS_LIMIT {
            return Vec::new();
        }

        let start = match self.cursor {
            Some(cursor) => cursor,
            None => match Self::highest_known_id(checkpoint) {
                Some(max) => max + 1,
                None => {
                    warn!("no numeric ids known; sequential probe has no starting point");
                    self.consecutive_misses = PROBE_MISS_LIMIT;
                    return Vec::new();
                }
            },
        };

        let mut candidates = Vec::new();
        let mut probe = start;
        for _ in 0..self.batch_size {
            let id = RecordId::new(probe.to_string());
            self.rate_limiter
                .acquire(self.client.base_url().as_str())
                .await;

            match self.client.fetch_detail(&id).await {
                Ok(detail) => {
                    debug!(record_id = %id, "probe hit");
                    self.consecutive_misses = 0;
                    candidates.push(RecordSummary {
                        id,
                        display_name: detail.display_name,
                        detail_url: None,
                        lead_image_url: None,
                    });
                }
                Err(e) => {
                    debug!(record_id = %id, error = %e, "probe miss");
                    self.consecutive_misses += 1;
                    if self.consecutive_misses >= PROBE_MISS_LIMIT {
                        break;
                    }
                }
            }
            probe += 1;
        }
        self.cursor = Some(probe);
        candidates
    }
}

/// Why the walker stopped producing batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Upstream reported no further pages.
    UpstreamExhausted,
    /// The configured maximum page count was reached.
    PageBudget,
    /// The configured target record count was discovered.
    TargetReached,
    /// The fallback discovery strategy ran dry after a stall.
    FallbackExhausted,
}

/// State machine that walks the listing pages.
pub struct PaginationWalker<'a> {
    client: &'a EndpointClient,
    rate_limiter: &'a RateLimiter,
    retry_policy: &'a RetryPolicy,
    store: &'a ProgressStore,
    config: &'a HarvestConfig,

    cursor: u32,
    pages_walked: u32,
    /// Upstream's own cursor from the previous page, for stall detection.
    previous_upstream_cursor: Option<u32>,
    no_advance_streak: u32,
    zero_new_streak: u32,

    fallback: Option<Box<dyn DiscoveryStrategy>>,
    in_fallback: bool,
    stop_reason: Option<StopReason>,
}

impl<'a> PaginationWalker<'a> {
    /// Creates a walker resuming from the checkpoint's page cursor.
    pub fn new(
        client: &'a EndpointClient,
        rate_limiter: &'a RateLimiter,
        retry_policy: &'a RetryPolicy,
        store: &'a ProgressStore,
        config: &'a HarvestConfig,
        checkpoint: &CrawlCheckpoint,
        fallback: Option<Box<dyn DiscoveryStrategy>>,
    ) -> Self {
        let cursor = checkpoint
            .last_completed_page
            .saturating_add(1)
            .max(config.first_page);

        info!(
            start_page = cursor,
            max_pages = config.max_pages,
            target_records = config.target_records,
            "pagination walker ready"
        );

        Self {
            client,
            rate_limiter,
            retry_policy,
            store,
            config,
            cursor,
            pages_walked: 0,
            previous_upstream_cursor: None,
            no_advance_streak: 0,
            zero_new_streak: 0,
            fallback,
            in_fallback: false,
            stop_reason: None,
        }
    }

    /// Why the walk ended; `None` while batches are still coming.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Produces the next batch of newly discovered records, or `None` when
    /// the walk is over.
    ///
    /// The checkpoint is mutated (discovered set, page cursor, failed
    /// pages) and saved before any batch is returned.
    ///
    /// # Errors
    ///
    /// Only checkpoint persistence failures; page fetch failures are
    /// recorded and walked past.
    pub async fn next_batch(
        &mut self,
        checkpoint: &mut CrawlCheckpoint,
    ) -> Result<Option<Vec<RecordSummary>>, CrawlError> {
        loop {
            if self.stop_reason.is_some() {
                return Ok(None);
            }

            if let Some(target) = self.config.target_records {
                if checkpoint.discovered.len() as u64 >= target {
                    info!(target, "target record count discovered, stopping walk");
                    self.stop_reason = Some(StopReason::TargetReached);
                    return Ok(None);
                }
            }

            if self.in_fallback {
                return self.next_fallback_batch(checkpoint).await;
            }

            if self.pages_walked >= self.config.max_pages {
                info!(max_pages = self.config.max_pages, "page budget spent");
                self.stop_reason = Some(StopReason::PageBudget);
                return Ok(None);
            }

            let page_number = self.cursor;
            self.pages_walked += 1;
            self.cursor += 1;

            let page = match self.fetch_page_with_retry(page_number).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(page = page_number, error = %e, "listing page failed, skipping");
                    checkpoint.failed_pages.insert(page_number);
                    checkpoint.advance_page(page_number);
                    self.store.save(checkpoint)?;
                    continue;
                }
            };

            let new_records = self.extract_new(checkpoint, &page);

            // Persist before yielding: resume must never re-announce these.
            checkpoint.advance_page(page_number);
            self.store.save(checkpoint)?;

            info!(
                page = page_number,
                listed = page.records.len(),
                new = new_records.len(),
                total_discovered = checkpoint.discovered.len(),
                "listing page processed"
            );

            if self.detect_stall(&page, new_records.len()) {
                if self.enter_fallback() {
                    if new_records.is_empty() {
                        continue;
                    }
                    return Ok(Some(new_records));
                }
                self.stop_reason = Some(StopReason::UpstreamExhausted);
                return if new_records.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(new_records))
                };
            }

            if page_is_last(&page) {
                debug!(page = page_number, "upstream reports no further pages");
                self.stop_reason = Some(StopReason::UpstreamExhausted);
                return if new_records.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(new_records))
                };
            }

            if !new_records.is_empty() {
                return Ok(Some(new_records));
            }
        }
    }

    async fn next_fallback_batch(
        &mut self,
        checkpoint: &mut CrawlCheckpoint,
    ) -> Result<Option<Vec<RecordSummary>>, CrawlError> {
        loop {
            let Some(fallback) = self.fallback.as_mut() else {
                self.stop_reason = Some(StopReason::FallbackExhausted);
                return Ok(None);
            };

            let candidates = fallback.next_candidates(checkpoint).await;
            if candidates.is_empty() {
                info!("fallback discovery exhausted");
                self.stop_reason = Some(StopReason::FallbackExhausted);
                return Ok(None);
            }

            let new_records: Vec<RecordSummary> = candidates
                .into_iter()
                .filter(|summary| checkpoint.insert_discovered(summary.id.clone()))
                .collect();

            self.store.save(checkpoint)?;

            if !new_records.is_empty() {
                debug!(new = new_records.len(), "fallback batch discovered");
                return Ok(Some(new_records));
            }
        }
    }

    /// Dedupes a page's summaries against the checkpoint, registering the
    /// new ones.
    fn extract_new(
        &self,
        checkpoint: &mut CrawlCheckpoint,
        page: &ListingPage,
    ) -> Vec<RecordSummary> {
        page.records
            .iter()
            .filter(|summary| checkpoint.insert_discovered(summary.id.clone()))
            .cloned()
            .collect()
    }

    /// Updates stall streaks and reports whether a stall was just detected.
    fn detect_stall(&mut self, page: &ListingPage, new_count: usize) -> bool {
        let upstream_cursor = page.page.as_ref().map(|info| info.current);
        if let (Some(previous), Some(current)) = (self.previous_upstream_cursor, upstream_cursor) {
            if current <= previous {
                self.no_advance_streak += 1;
            } else {
                self.no_advance_streak = 0;
            }
        }
        self.previous_upstream_cursor = upstream_cursor;

        if new_count == 0 && !page.records.is_empty() {
            self.zero_new_streak += 1;
        } else {
            self.zero_new_streak = 0;
        }

        let stalled = self.no_advance_streak >= STALL_THRESHOLD
            || self.zero_new_streak >= STALL_THRESHOLD;
        if stalled {
            warn!(
                no_advance_streak = self.no_advance_streak,
                zero_new_streak = self.zero_new_streak,
                "pagination stall detected"
            );
        }
        stalled
    }

    /// Switches to the fallback strategy; false when none is configured.
    fn enter_fallback(&mut self) -> bool {
        if self.fallback.is_some() {
            info!("switching to fallback discovery strategy");
            self.in_fallback = true;
            true
        } else {
            warn!("no fallback discovery configured; treating stall as end of catalog");
            false
        }
    }

    async fn fetch_page_with_retry(&self, page: u32) -> Result<ListingPage, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.rate_limiter
                .acquire(self.client.base_url().as_str())
                .await;

            match self.client.fetch_page(page).await {
                Ok(listing) => return Ok(listing),
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
                                page,
                                attempt,
                                delay_ms = delay.as_millis(),
                                error = %e,
                                "retrying listing page"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(page, %reason, "not retrying listing page");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

/// True when a listing page signals the end of the catalog, in either
/// pagination style.
fn page_is_last(page: &ListingPage) -> bool {
    if let Some(false) = page.has_more {
        return true;
    }
    if let Some(info) = &page.page {
        if let Some(total) = info.total_pages {
            return info.current >= total;
        }
    }
    // Neither style present: an empty page is the only stop signal left.
    page.has_more.is_none() && page.page.is_none() && page.records.is_empty()
}
