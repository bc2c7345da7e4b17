//! Networking layer: endpoint client, failure classification, retry policy,
//! and the shared per-host rate limiter.
//!
//! The split follows one rule: [`EndpointClient`] performs requests and
//! normalizes failures, [`retry`] decides what to do about them, and
//! [`RateLimiter`] decides when the next request may go out. Components
//! compose the three rather than re-implementing any of it.

mod client;
mod error;
pub mod rate_limit;
mod retry;

pub use client::EndpointClient;
pub use error::FetchError;
pub use rate_limit::{RateLimiter, extract_host, parse_retry_after};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error,
    classify_http_status,
};
