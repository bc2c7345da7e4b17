//! Error types for endpoint requests.
//!
//! Every network call surfaces a [`FetchError`] carrying the URL and enough
//! structure for the retry layer to classify it as transient or permanent.
//! No retry decisions are made here.

use thiserror::Error;

/// Errors produced by [`EndpointClient`](super::EndpointClient) calls.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused/reset, TLS).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// The response body did not match the expected shape.
    ///
    /// Upstream sometimes swaps a JSON endpoint for an HTML error page
    /// without changing the status code; that lands here and is treated as
    /// permanent for the requested unit.
    #[error("malformed response body from {url}: {detail}")]
    MalformedBody {
        /// The URL whose body failed to parse.
        url: String,
        /// Parser diagnostic.
        detail: String,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The HTTP client itself could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error without a Retry-After value.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with an optional Retry-After value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a malformed-body error.
    pub fn malformed_body(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedBody {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Creates an invalid-URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns the parsed Retry-After delay carried by a rate-limited
    /// response, when present.
    #[must_use]
    pub fn retry_after_delay(&self) -> Option<std::time::Duration> {
        match self {
            Self::HttpStatus {
                retry_after: Some(value),
                ..
            } => super::parse_retry_after(value),
            _ => None,
        }
    }

    /// Returns the URL associated with this error, when there is one.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Network { url, .. }
            | Self::Timeout { url }
            | Self::HttpStatus { url, .. }
            | Self::MalformedBody { url, .. }
            | Self::InvalidUrl { url } => Some(url),
            Self::ClientBuild { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_include_url_and_status() {
        let err = FetchError::http_status("https://example.com/page", 503);
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("https://example.com/page"));
    }

    #[test]
    fn test_retry_after_delay_parses_seconds_form() {
        let err = FetchError::http_status_with_retry_after(
            "https://example.com/list",
            429,
            Some("2".to_string()),
        );
        assert_eq!(
            err.retry_after_delay(),
            Some(std::time::Duration::from_secs(2))
        );

        let err = FetchError::http_status("https://example.com/list", 429);
        assert_eq!(err.retry_after_delay(), None);
    }

    #[test]
    fn test_url_accessor() {
        let err = FetchError::timeout("https://example.com/a");
        assert_eq!(err.url(), Some("https://example.com/a"));

        let err = FetchError::malformed_body("https://example.com/b", "expected JSON");
        assert_eq!(err.url(), Some("https://example.com/b"));
    }
}
