//! Resumable, retry-protected download of a single image.
//!
//! One [`ImageDownloader`] is shared by all harvest workers. It layers the
//! crate's retry policy and rate gate over [`EndpointClient::fetch_binary`]
//! and owns the filesystem side: atomic visibility (temp-write then
//! rename), content hashing, and the resume-by-presence check that makes
//! re-runs cheap.
//!
//! Network failures never escalate out of a single image - the returned
//! [`ImageRef`] carries `Failed` status instead. Only destination
//! filesystem errors propagate, because they doom the whole run.

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::model::{ImageRef, ImageStatus};
use crate::net::{
    EndpointClient, FailureType, FetchError, RateLimiter, RetryDecision, RetryPolicy,
    classify_error,
};

use super::HarvestError;

/// Image file extensions the raw store accepts from source URLs.
const KNOWN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Extension assumed when the URL does not reveal one.
const DEFAULT_EXTENSION: &str = "jpg";

/// Outcome of one [`ImageDownloader::download`] call.
#[derive(Debug)]
pub struct DownloadOutcome {
    /// The resulting image ref, whatever its status.
    pub image: ImageRef,
    /// True when the file was already on disk and no request was made.
    pub resumed: bool,
}

/// Downloads single images into the raw store.
#[derive(Debug, Clone)]
pub struct ImageDownloader {
    client: EndpointClient,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
}

impl ImageDownloader {
    /// Creates a downloader sharing the run's client and rate gate.
    #[must_use]
    pub fn new(
        client: EndpointClient,
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            rate_limiter,
            retry_policy,
        }
    }

    /// Downloads `url` to `dest`, returning the resulting [`DownloadOutcome`].
    ///
    /// When `dest` already exists with nonzero size the download is skipped
    /// entirely - zero network requests, `resumed` is true - and the content
    /// hash is computed from the file on disk so cleaning stays
    /// deterministic across resumes. A zero-length leftover does not count
    /// as present and is fetched again.
    ///
    /// Downloaded bytes that do not decode as an image mark the ref
    /// `Failed` (corruption is a download-stage verdict, not a cleaning
    /// decision).
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Io`] only for destination filesystem
    /// failures; these abort the run since no forward progress is possible.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<DownloadOutcome, HarvestError> {
        let mut image = ImageRef::pending(url);

        if let Some(existing_len) = file_nonzero_len(dest) {
            debug!(path = %dest.display(), bytes = existing_len, "already present, skipping download");
            let bytes = std::fs::read(dest).map_err(|e| HarvestError::io(dest, e))?;
            image.local_path = Some(dest.to_path_buf());
            image.content_hash = Some(content_hash(&bytes));
            image.status = ImageStatus::Downloaded;
            return Ok(DownloadOutcome {
                image,
                resumed: true,
            });
        }

        let bytes = match self.fetch_with_retry(url).await {
            Ok(bytes) => bytes,
            Err((e, attempts)) => {
                warn!(url, attempts, error = %e, "image download failed");
                image.status = ImageStatus::Failed;
                image.failure = Some(e.to_string());
                return Ok(DownloadOutcome {
                    image,
                    resumed: false,
                });
            }
        };

        if let Err(detail) = probe_image(&bytes) {
            warn!(url, %detail, "downloaded bytes are not a decodable image");
            image.status = ImageStatus::Failed;
            image.failure = Some(format!("corrupt image: {detail}"));
            return Ok(DownloadOutcome {
                image,
                resumed: false,
            });
        }

        // Temp-write then rename: a crash never leaves a half-written file
        // that a later resume would mistake for a completed download.
        let temp_path = dest.with_extension("part");
        std::fs::write(&temp_path, &bytes).map_err(|e| HarvestError::io(&temp_path, e))?;
        std::fs::rename(&temp_path, dest).map_err(|e| HarvestError::io(dest, e))?;

        info!(url, path = %dest.display(), bytes = bytes.len(), "image downloaded");

        image.local_path = Some(dest.to_path_buf());
        image.content_hash = Some(content_hash(&bytes));
        image.status = ImageStatus::Downloaded;
        Ok(DownloadOutcome {
            image,
            resumed: false,
        })
    }

    /// Fetches with the shared retry policy; returns the final error and
    /// total attempt count when exhausted.
    async fn fetch_with_retry(&self, url: &str) -> Result<Vec<u8>, (FetchError, u32)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.rate_limiter.acquire(url).await;

            match self.client.fetch_binary(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    let failure_type = classify_error(&e);

                    // Honor a server-provided Retry-After on 429.
                    let retry_after = if failure_type == FailureType::RateLimited {
                        e.retry_after_delay()
                    } else {
                        None
                    };
                    if let Some(delay) = retry_after {
                        self.rate_limiter.record_rate_limit(url, delay).await;
                    }

                    match self.retry_policy.should_retry(failure_type, attempt) {
                        RetryDecision::Retry {
                            delay: backoff_delay,
                            attempt: next_attempt,
                        } => {
                            let delay = retry_after.unwrap_or(backoff_delay);
                            info!(
                                url,
                                attempt = next_attempt,
                                max_attempts = self.retry_policy.max_attempts(),
                                delay_ms = delay.as_millis(),
                                error = %e,
                                "retrying image download"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(url, %reason, "not retrying image download");
                            return Err((e, attempt));
                        }
                    }
                }
            }
        }
    }
}

/// Derives the raw-store file extension from a source URL.
#[must_use]
pub fn extension_for_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    KNOWN_EXTENSIONS
        .iter()
        .find(|known| **known == ext)
        .copied()
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Lowercase hex SHA-256 of the given bytes.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        // Writing to a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Checks that the bytes carry a decodable image header.
///
/// Only the header is parsed; the full pixel decode happens later in the
/// cleaning stage, which needs dimensions anyway.
fn probe_image(bytes: &[u8]) -> Result<(), String> {
    let reader = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?;
    if reader.format().is_none() {
        return Err("unrecognized image format".to_string());
    }
    reader.into_dimensions().map_err(|e| e.to_string())?;
    Ok(())
}

/// Returns the file's length when it exists and is nonzero.
fn file_nonzero_len(path: &Path) -> Option<u64> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for_url() {
        assert_eq!(extension_for_url("https://x.test/a/photo.JPG"), "jpg");
        assert_eq!(extension_for_url("https://x.test/a/photo.webp?v=2"), "webp");
        assert_eq!(extension_for_url("https://x.test/a/photo"), "jpg");
        assert_eq!(extension_for_url("https://x.test/a/archive.tar.gz"), "jpg");
    }

    #[test]
    fn test_content_hash_is_stable_lowercase_hex() {
        let hash = content_hash(b"hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_probe_rejects_non_image_bytes() {
        assert!(probe_image(b"<html>not an image</html>").is_err());
    }

    #[test]
    fn test_probe_accepts_real_png() {
        let mut png = Vec::new();
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        assert!(probe_image(&png).is_ok());
    }
}
