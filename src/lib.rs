//! Pawprint Core Library
//!
//! This library implements a crawl-and-harvest pipeline for an upstream
//! adoption catalog: paginated discovery of records, resumable checkpointed
//! image downloading, multi-stage dataset cleaning, and deterministic
//! reorganization into a final browsable tree.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`net`] - HTTP client, retry policy, per-domain rate limiting
//! - [`crawl`] - Pagination walker with stall detection and fallback discovery
//! - [`progress`] - Crash-safe checkpoint and completion log
//! - [`harvest`] - Record harvester and resumable image downloader
//! - [`raw_store`] - On-disk layout of harvested records
//! - [`clean`] - Ordered filter pipeline over the raw store
//! - [`reorganize`] - Final dataset layout

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]

pub mod clean;
pub mod config;
pub mod crawl;
pub mod harvest;
pub mod model;
pub mod net;
pub mod progress;
pub mod raw_store;
pub mod reorganize;

// Re-export commonly used types
pub use clean::{CleanError, CleaningReport, FixedClassifier, SubjectClassifier, run_clean};
pub use config::{
    CleanConfig, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE, DEFAULT_RATE_LIMIT_MS, HarvestConfig,
    ensure_writable_root,
};
pub use crawl::{DiscoveryStrategy, PaginationWalker, SequentialProbe, StopReason};
pub use harvest::{CancelFlag, HarvestError, HarvestStats, run_harvest};
pub use model::{ImageRef, ImageStatus, Record, RecordId, RejectReason};
pub use net::{
    DEFAULT_MAX_ATTEMPTS, EndpointClient, FailureType, FetchError, RateLimiter, RetryDecision,
    RetryPolicy, classify_error,
};
pub use progress::{CrawlCheckpoint, ProgressStore};
pub use reorganize::{DatasetSummary, run_reorganize};
