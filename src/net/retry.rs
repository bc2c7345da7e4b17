//! Retry policy with exponential backoff for transient request failures.
//!
//! One [`RetryPolicy`] instance is shared by every network-calling component
//! (pagination walker, detail fetch, image download) so backoff behavior is
//! uniform across the pipeline instead of duplicated per call site.
//!
//! When a request fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - may succeed on retry (timeouts, 5xx)
//! - [`FailureType::Permanent`] - retrying cannot help (4xx, bad bodies)
//! - [`FailureType::RateLimited`] - server pushback (429), retried with
//!   backoff and the Retry-After header when present
//!
//! The policy then decides whether to retry based on failure type and
//! attempt count, calculating exponential backoff delays with jitter.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::FetchError;

/// Default maximum attempts (including the initial attempt).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of request failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, connection reset, 5xx server errors.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, malformed response body, invalid URL.
    Permanent,

    /// Server rate limiting (HTTP 429). Retried with backoff, honoring the
    /// Retry-After header when the server provides one.
    RateLimited,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so the first retry
        /// is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// Delay formula: `min(base_delay * multiplier^(attempt-1), max_delay) +
/// jitter`. With defaults, delays are approximately 1s, 2s, 4s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with custom settings.
    ///
    /// `max_attempts` includes the initial attempt and is clamped to >= 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom `max_attempts`, defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after a failed attempt.
    ///
    /// `attempt` is the 1-indexed attempt number that just failed.
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry with exponential backoff and jitter.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt is 1-indexed; the first retry waits 1x the base delay.
        let exponent = f64::from(attempt - 1);
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + calculate_jitter()
    }
}

/// Generates random jitter between 0 and [`MAX_JITTER`].
///
/// Jitter spreads out retries when several downloads fail simultaneously.
fn calculate_jitter() -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Classifies a fetch error into a failure type for retry decisions.
///
/// HTTP statuses: 408 and 5xx are transient, 429 is rate-limited, every
/// other 4xx is permanent. Timeouts and network errors are transient (the
/// server may come back); malformed bodies and invalid URLs are permanent.
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),
        FetchError::Timeout { .. } | FetchError::Network { .. } => FailureType::Transient,
        FetchError::MalformedBody { .. }
        | FetchError::InvalidUrl { .. }
        | FetchError::ClientBuild { .. } => FailureType::Permanent,
    }
}

/// Classifies an HTTP status code into a failure type.
#[must_use]
pub fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,   // Request Timeout
        429 => FailureType::RateLimited, // Too Many Requests
        400..=499 => FailureType::Permanent,
        500..=599 => FailureType::Transient,
        // Anything else reaching here (1xx/3xx leaking through redirect
        // handling) won't improve on retry.
        _ => FailureType::Permanent,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_statuses() {
        assert_eq!(classify_http_status(400), FailureType::Permanent);
        assert_eq!(classify_http_status(404), FailureType::Permanent);
        assert_eq!(classify_http_status(408), FailureType::Transient);
        assert_eq!(classify_http_status(410), FailureType::Permanent);
        assert_eq!(classify_http_status(429), FailureType::RateLimited);
        assert_eq!(classify_http_status(500), FailureType::Transient);
        assert_eq!(classify_http_status(502), FailureType::Transient);
        assert_eq!(classify_http_status(503), FailureType::Transient);
        assert_eq!(classify_http_status(504), FailureType::Transient);
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(
            classify_error(&FetchError::timeout("https://example.com")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&FetchError::malformed_body(
                "https://example.com",
                "expected JSON"
            )),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&FetchError::invalid_url("not a url")),
            FailureType::Permanent
        );
    }

    #[test]
    fn test_permanent_failure_never_retried() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Permanent, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_transient_retried_until_exhausted() {
        let policy = RetryPolicy::with_max_attempts(3);

        match policy.should_retry(FailureType::Transient, 1) {
            RetryDecision::Retry { attempt, .. } => assert_eq!(attempt, 2),
            RetryDecision::DoNotRetry { reason } => panic!("expected retry, got: {reason}"),
        }

        match policy.should_retry(FailureType::Transient, 2) {
            RetryDecision::Retry { attempt, .. } => assert_eq!(attempt, 3),
            RetryDecision::DoNotRetry { reason } => panic!("expected retry, got: {reason}"),
        }

        let decision = policy.should_retry(FailureType::Transient, 3);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_rate_limited_is_retryable() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(FailureType::RateLimited, 1),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(400),
            2.0,
        );

        // Jitter adds at most MAX_JITTER on top of the deterministic part.
        let delay_for = |attempt| match policy.should_retry(FailureType::Transient, attempt) {
            RetryDecision::Retry { delay, .. } => delay,
            RetryDecision::DoNotRetry { reason } => panic!("expected retry, got: {reason}"),
        };

        let d1 = delay_for(1);
        assert!(d1 >= Duration::from_millis(100));
        assert!(d1 <= Duration::from_millis(100) + MAX_JITTER);

        let d2 = delay_for(2);
        assert!(d2 >= Duration::from_millis(200));

        // Attempt 5 would be 1600ms uncapped; the cap holds it at 400ms.
        let d5 = delay_for(5);
        assert!(d5 <= Duration::from_millis(400) + MAX_JITTER);
    }

    #[test]
    fn test_max_attempts_clamped_to_one() {
        let policy = RetryPolicy::with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
    }
}
