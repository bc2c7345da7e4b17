//! HTTP client for the catalog's listing, detail, and image endpoints.
//!
//! One [`EndpointClient`] is created per run and shared by every component.
//! It owns the reqwest client (connection pool + cookie session) and the
//! request shaping: browser-like headers, the form-encoded listing POST, and
//! uniform error normalization into [`FetchError`].
//!
//! No retry logic lives here. Callers classify the returned error with
//! [`classify_error`](super::classify_error) and apply the shared
//! [`RetryPolicy`](super::RetryPolicy).

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Response};
use tracing::{debug, instrument};
use url::Url;

use crate::config::HarvestConfig;
use crate::model::{ListingPage, RecordDetail, RecordId};

use super::error::FetchError;

/// Connect timeout for all requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Browser-like User-Agent. The catalog serves its listing endpoint to the
/// site's own frontend; a tool-identifying UA gets an empty response.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP client for catalog endpoints.
///
/// Cheap to clone (the inner reqwest client is an `Arc` internally); clones
/// share the same connection pool and cookie session.
#[derive(Debug, Clone)]
pub struct EndpointClient {
    client: Client,
    base_url: Url,
    listing_path: String,
    detail_path: String,
    page_size: u32,
}

impl EndpointClient {
    /// Creates a client from the run configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] when `base_url` does not parse and
    /// [`FetchError::ClientBuild`] when the underlying client cannot be
    /// constructed.
    pub fn new(config: &HarvestConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|_| FetchError::invalid_url(config.base_url.clone()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers.insert(
            "X-Requested-With",
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .build()
            .map_err(|source| FetchError::ClientBuild { source })?;

        Ok(Self {
            client,
            base_url,
            listing_path: config.listing_path.clone(),
            detail_path: config.detail_path.clone(),
            page_size: config.page_size,
        })
    }

    /// Returns the catalog origin this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetches one page of the listing endpoint.
    ///
    /// The endpoint is a form-encoded POST whose `search_cond` field carries
    /// a JSON search condition; only the page cursor varies between calls
    /// (filters are left empty to walk the whole catalog).
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] for network failures, non-2xx statuses, or a
    /// body that does not deserialize as a listing page.
    #[instrument(skip(self))]
    pub async fn fetch_page(&self, page: u32) -> Result<ListingPage, FetchError> {
        let url = self.join(&self.listing_path)?;
        let url_str = url.to_string();

        let search_cond = serde_json::json!({
            "params": "contents/",
            "p": page.to_string(),
            // The endpoint's page field is 0-based; `p` stays 1-based.
            "page": page.saturating_sub(1),
            "limit": self.page_size,
            "keyword": "",
            "status_id": "",
        });
        let form = [
            ("search_cond", search_cond.to_string()),
            ("spMode", "0".to_string()),
        ];

        debug!(page, url = %url_str, "fetching listing page");

        let response = self
            .client
            .post(url)
            .header(header::REFERER, self.referer_for_page(page))
            .form(&form)
            .send()
            .await
            .map_err(|e| map_send_error(&url_str, e))?;

        let response = check_status(&url_str, response)?;
        decode_json(&url_str, response).await
    }

    /// Fetches a record's detail: full metadata plus the ordered image list.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] for network failures, non-2xx statuses, or a
    /// body that does not deserialize as a record detail.
    #[instrument(skip(self), fields(record_id = %record_id))]
    pub async fn fetch_detail(&self, record_id: &RecordId) -> Result<RecordDetail, FetchError> {
        let path = self.detail_path.replace("{id}", record_id.as_str());
        let url = self.join(&path)?;
        let url_str = url.to_string();

        debug!(url = %url_str, "fetching record detail");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_send_error(&url_str, e))?;

        let response = check_status(&url_str, response)?;
        decode_json(&url_str, response).await
    }

    /// Fetches a binary resource (an image) fully into memory.
    ///
    /// Catalog images are small enough that buffering is fine; the body is
    /// still consumed as a stream so a stalled connection fails with a
    /// network error rather than hanging on one giant read.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] for network failures or non-2xx statuses.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_binary(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        // Resolve relative image URLs against the catalog origin.
        let absolute = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => self
                .base_url
                .join(url)
                .map_err(|_| FetchError::invalid_url(url))?,
        };
        let url_str = absolute.to_string();

        let response = self
            .client
            .get(absolute)
            .send()
            .await
            .map_err(|e| map_send_error(&url_str, e))?;

        let response = check_status(&url_str, response)?;

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    FetchError::timeout(&url_str)
                } else {
                    FetchError::network(&url_str, e)
                }
            })?;
            bytes.extend_from_slice(&chunk);
        }

        debug!(bytes = bytes.len(), "binary fetch complete");
        Ok(bytes)
    }

    fn join(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|_| FetchError::invalid_url(format!("{}{path}", self.base_url)))
    }

    /// Referer the catalog frontend would send for a given listing page.
    fn referer_for_page(&self, page: u32) -> String {
        format!("{}foster/cat/contents/?p={page}", self.base_url)
    }
}

/// Maps a reqwest send error into the fetch error taxonomy.
fn map_send_error(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::timeout(url)
    } else {
        FetchError::network(url, error)
    }
}

/// Turns a non-success response into an HTTP status error, capturing the
/// Retry-After header for 429 handling.
fn check_status(url: &str, response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Err(FetchError::http_status_with_retry_after(
        url,
        status.as_u16(),
        retry_after,
    ))
}

/// Decodes a JSON body, mapping parse failures to `MalformedBody`.
async fn decode_json<T: serde::de::DeserializeOwned>(
    url: &str,
    response: Response,
) -> Result<T, FetchError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| map_send_error(url, e))?;

    serde_json::from_slice(&body).map_err(|e| FetchError::malformed_body(url, e.to_string()))
}
