//! Integration tests for the resumable image downloader.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use pawprint_core::harvest::ImageDownloader;
use pawprint_core::model::ImageStatus;
use pawprint_core::{EndpointClient, HarvestConfig, RateLimiter, RetryPolicy};

mod support;
use support::{FlakyBytes, png_bytes};
use support::socket_guard::start_mock_server_or_skip;

fn downloader_for(base_url: &str, max_attempts: u32) -> ImageDownloader {
    let config = HarvestConfig {
        base_url: base_url.to_string(),
        rate_limit_ms: 0,
        ..HarvestConfig::default()
    };
    let client = EndpointClient::new(&config).unwrap();
    // Millisecond backoff keeps the retry path fast under test.
    let retry_policy = RetryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
        2.0,
    );
    ImageDownloader::new(client, Arc::new(RateLimiter::disabled()), retry_policy)
}

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp = tempfile::TempDir::new().unwrap();

    let (responder, request_count) = FlakyBytes::new(2, png_bytes(64, 64, 9));
    Mock::given(method("GET"))
        .and(path("/img/cat.png"))
        .respond_with(responder)
        .mount(&server)
        .await;

    let downloader = downloader_for(&server.uri(), 3);
    let dest = temp.path().join("image_001.png");
    let url = format!("{}/img/cat.png", server.uri());

    let outcome = downloader.download(&url, &dest).await.unwrap();

    assert_eq!(outcome.image.status, ImageStatus::Downloaded);
    assert!(!outcome.resumed);
    assert!(dest.exists());
    assert!(outcome.image.content_hash.is_some());
    assert_eq!(
        request_count.load(Ordering::SeqCst),
        3,
        "two 500s then one success is exactly three requests"
    );
}

#[tokio::test]
async fn test_exhausted_retries_mark_failed_without_aborting() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp = tempfile::TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/img/broken.png"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let downloader = downloader_for(&server.uri(), 2);
    let dest = temp.path().join("image_001.png");
    let url = format!("{}/img/broken.png", server.uri());

    let outcome = downloader.download(&url, &dest).await.unwrap();

    assert_eq!(outcome.image.status, ImageStatus::Failed);
    assert!(outcome.image.failure.is_some());
    assert!(!dest.exists(), "no partial file is left behind");
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp = tempfile::TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/img/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let downloader = downloader_for(&server.uri(), 5);
    let dest = temp.path().join("image_001.png");
    let url = format!("{}/img/gone.png", server.uri());

    let outcome = downloader.download(&url, &dest).await.unwrap();
    assert_eq!(outcome.image.status, ImageStatus::Failed);
}

#[tokio::test]
async fn test_already_present_file_makes_zero_requests() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp = tempfile::TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/img/cat.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(64, 64, 1)))
        .expect(0)
        .mount(&server)
        .await;

    let dest = temp.path().join("image_001.png");
    let bytes = png_bytes(64, 64, 1);
    std::fs::write(&dest, &bytes).unwrap();

    let downloader = downloader_for(&server.uri(), 3);
    let url = format!("{}/img/cat.png", server.uri());

    let outcome = downloader.download(&url, &dest).await.unwrap();

    assert_eq!(outcome.image.status, ImageStatus::Downloaded);
    assert!(outcome.resumed);
    // The hash comes from the bytes on disk, so cleaning sees the same
    // content a fresh download would have produced.
    assert_eq!(
        outcome.image.content_hash.as_deref(),
        Some(pawprint_core::harvest::content_hash(&bytes).as_str())
    );
}

#[tokio::test]
async fn test_zero_length_leftover_is_refetched_not_resumed() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp = tempfile::TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/img/cat.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(64, 64, 1)))
        .expect(1)
        .mount(&server)
        .await;

    // A crash can leave an empty file behind; it is not a completed
    // download and must not be reported as a resume.
    let dest = temp.path().join("image_001.png");
    std::fs::write(&dest, b"").unwrap();

    let downloader = downloader_for(&server.uri(), 3);
    let url = format!("{}/img/cat.png", server.uri());

    let outcome = downloader.download(&url, &dest).await.unwrap();

    assert_eq!(outcome.image.status, ImageStatus::Downloaded);
    assert!(!outcome.resumed);
    assert!(std::fs::metadata(&dest).unwrap().len() > 0);
}

#[tokio::test]
async fn test_undecodable_body_marks_failed() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp = tempfile::TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/img/fake.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<html>soft 404</html>".to_vec()))
        .mount(&server)
        .await;

    let downloader = downloader_for(&server.uri(), 3);
    let dest = temp.path().join("image_001.png");
    let url = format!("{}/img/fake.png", server.uri());

    let outcome = downloader.download(&url, &dest).await.unwrap();

    assert_eq!(outcome.image.status, ImageStatus::Failed);
    assert!(outcome.image.failure.unwrap().contains("corrupt image"));
    assert!(!dest.exists());
}
