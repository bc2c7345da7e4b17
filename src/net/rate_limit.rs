//! Per-host rate limiting shared by every requesting worker.
//!
//! A single [`RateLimiter`] is the one gate all requests pass through, so
//! the minimum inter-request delay holds regardless of how many workers are
//! running or how often retries fire. Per-worker sleeps would allow bursts;
//! this gate serializes the delay accounting per host instead.
//!
//! Requests to different hosts proceed in parallel without waiting for each
//! other. Only subsequent requests to the *same* host are delayed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Warning threshold for cumulative delay per host (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Shared per-host rate limiter.
///
/// Designed to be wrapped in `Arc` and shared across Tokio tasks. `DashMap`
/// gives lock-free access to per-host state; a `tokio::sync::Mutex` inside
/// each state makes the check-and-update of the last-request time atomic.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum delay between requests to the same host.
    default_delay: Duration,

    /// Whether rate limiting is disabled (`--rate-limit 0`).
    disabled: bool,

    /// Per-host state. Arc lets the DashMap shard lock be released before
    /// awaiting on the inner Mutex (never hold a shard lock across await).
    hosts: DashMap<String, Arc<HostState>>,
}

/// State tracked for each host.
#[derive(Debug)]
struct HostState {
    /// Time of the last request to this host. `None` means no request yet
    /// (the first request proceeds immediately).
    last_request: Mutex<Option<Instant>>,

    /// Cumulative delay applied to this host, in milliseconds. Used to warn
    /// when a run spends excessive time waiting on one host.
    cumulative_delay_ms: AtomicU64,
}

impl HostState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a rate limiter with the given minimum inter-request delay.
    #[must_use]
    pub fn new(default_delay: Duration) -> Self {
        debug!(delay_ms = default_delay.as_millis(), "creating rate limiter");
        Self {
            default_delay,
            disabled: false,
            hosts: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            default_delay: Duration::ZERO,
            disabled: true,
            hosts: DashMap::new(),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured minimum inter-request delay.
    #[must_use]
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Acquires permission to make a request to the given URL's host,
    /// sleeping as needed to respect the minimum delay.
    ///
    /// The first request to any host proceeds immediately.
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);

        // Clone the Arc to release the DashMap shard lock before awaiting.
        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();

        let mut last_request_guard = state.last_request.lock().await;

        if let Some(last_request) = *last_request_guard {
            let elapsed = last_request.elapsed();

            if elapsed < self.default_delay {
                let delay = self.default_delay.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    host = %host,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting against this host"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        } else {
            debug!(host = %host, "first request to host - no delay");
        }

        *last_request_guard = Some(Instant::now());
    }

    /// Records a server-mandated delay (from a Retry-After header) so the
    /// next `acquire` for this host waits it out.
    pub async fn record_rate_limit(&self, url: &str, delay: Duration) {
        let host = extract_host(url);

        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();

        let cumulative = state.add_cumulative_delay(delay);

        // Push the last-request marker into the future so acquire() waits
        // out the server-mandated window.
        let mut last_request_guard = state.last_request.lock().await;
        let resume_marker = Instant::now() + delay.saturating_sub(self.default_delay);
        *last_request_guard = Some(resume_marker.max(Instant::now()));

        debug!(
            host = %host,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
    }
}

/// Extracts the host from a URL for rate-limit bucketing.
///
/// Unparseable URLs share an "unknown" bucket so they are still limited.
#[must_use]
pub fn extract_host(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value into a duration.
///
/// Accepts both forms from RFC 7231: delay-seconds and HTTP-date. Values
/// are capped at one hour; negative or unparseable values yield `None`.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    if let Ok(date) = httpdate::parse_http_date(trimmed) {
        let now = std::time::SystemTime::now();
        return match date.duration_since(now) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            // Date in the past: retry immediately.
            Err(_) => Some(Duration::ZERO),
        };
    }

    None
}
