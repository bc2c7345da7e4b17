//! Run configuration for the harvest and cleaning pipeline.
//!
//! There is no process-wide configuration singleton: a [`HarvestConfig`] /
//! [`CleanConfig`] is built once (from CLI flags or deserialized from a
//! file) and passed by reference to the components that need it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default minimum delay between requests to the same host (milliseconds).
pub const DEFAULT_RATE_LIMIT_MS: u64 = 2000;

/// Default page size requested from the listing endpoint.
pub const DEFAULT_PAGE_SIZE: u32 = 22;

/// Default cap on listing pages walked in one run.
pub const DEFAULT_MAX_PAGES: u32 = 50;

/// Crawl and download parameters for one harvest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Catalog origin, e.g. `https://catalog.example.com`.
    pub base_url: String,

    /// Path of the POST listing endpoint, relative to `base_url`.
    pub listing_path: String,

    /// Path template of the detail endpoint; `{id}` is replaced with the
    /// record id.
    pub detail_path: String,

    /// Records requested per listing page.
    pub page_size: u32,

    /// First page to request when no checkpoint exists (1-based).
    pub first_page: u32,

    /// Hard cap on listing pages walked in one run.
    pub max_pages: u32,

    /// Stop discovering once this many records are known, when set.
    pub target_records: Option<u64>,

    /// Stop harvesting once this many images downloaded, when set.
    pub target_images: Option<u64>,

    /// Maximum attempts per network operation (including the first).
    pub max_attempts: u32,

    /// Minimum inter-request delay per host in milliseconds; 0 disables.
    pub rate_limit_ms: u64,

    /// Bounded worker pool size for per-record harvesting.
    pub concurrency: usize,

    /// Root of the raw store; per-record directories and the checkpoint
    /// live underneath.
    pub output_root: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.neko-jirushi.com".to_string(),
            listing_path: "/foster/ajax/ajax_getFosterList.php".to_string(),
            detail_path: "/foster/api/detail/{id}".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            first_page: 1,
            max_pages: DEFAULT_MAX_PAGES,
            target_records: None,
            target_images: None,
            max_attempts: 3,
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            concurrency: 4,
            output_root: PathBuf::from("harvested"),
        }
    }
}

impl HarvestConfig {
    /// Resolves the detail endpoint path for a record id.
    #[must_use]
    pub fn detail_path_for(&self, id: &str) -> String {
        self.detail_path.replace("{id}", id)
    }
}

/// Thresholds for the cleaning filter pipeline.
///
/// Defaults reproduce the conservative cleaning pass of the source dataset;
/// stricter or looser runs are a matter of configuration, not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanConfig {
    /// Minimum file size in bytes; smaller files are icon/placeholder noise.
    pub min_bytes: u64,

    /// Minimum width in pixels.
    pub min_width: u32,

    /// Minimum height in pixels.
    pub min_height: u32,

    /// Lower bound on width/height ratio (rejects extremely tall banners).
    pub min_aspect_ratio: f32,

    /// Upper bound on width/height ratio (rejects extremely wide banners).
    pub max_aspect_ratio: f32,

    /// Minimum classifier confidence to keep an image.
    pub confidence_threshold: f32,

    /// When true, classifier failures reject the image instead of passing
    /// it through as inconclusive.
    pub strict_classifier: bool,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            min_bytes: 5000,
            min_width: 100,
            min_height: 100,
            min_aspect_ratio: 0.1,
            max_aspect_ratio: 10.0,
            confidence_threshold: 0.3,
            strict_classifier: false,
        }
    }
}

/// Verifies that a destination root exists (creating it if needed) and is
/// writable, by round-tripping a probe file.
///
/// This is the one check that must fail the whole run up front: nothing can
/// make forward progress against an unwritable store.
///
/// # Errors
///
/// Returns the underlying [`std::io::Error`] when the directory cannot be
/// created or written to.
pub fn ensure_writable_root(root: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(root)?;
    let probe = root.join(".write_probe");
    std::fs::write(&probe, b"probe")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_path_substitution() {
        let config = HarvestConfig::default();
        assert_eq!(
            config.detail_path_for("226656"),
            "/foster/api/detail/226656"
        );
    }

    #[test]
    fn test_clean_config_defaults_match_conservative_pass() {
        let config = CleanConfig::default();
        assert_eq!(config.min_bytes, 5000);
        assert_eq!(config.min_width, 100);
        assert_eq!(config.min_height, 100);
        assert!(!config.strict_classifier);
    }

    #[test]
    fn test_ensure_writable_root_creates_missing_dirs() {
        let temp = tempfile::TempDir::new().unwrap();
        let nested = temp.path().join("a/b/c");
        ensure_writable_root(&nested).unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join(".write_probe").exists());
    }
}
