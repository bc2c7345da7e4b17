//! End-to-end pipeline test: harvest a mock catalog, clean the raw store,
//! and lay out the final dataset tree.

use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pawprint_core::{
    CancelFlag, CleanConfig, FixedClassifier, HarvestConfig, RecordId, run_clean, run_harvest,
    run_reorganize,
};

mod support;
use support::png_bytes;
use support::socket_guard::start_mock_server_or_skip;

const LISTING_PATH: &str = "/foster/ajax/ajax_getFosterList.php";

fn harvest_config(base_url: &str, output_root: &std::path::Path) -> Arc<HarvestConfig> {
    Arc::new(HarvestConfig {
        base_url: base_url.to_string(),
        rate_limit_ms: 0,
        concurrency: 2,
        max_pages: 5,
        output_root: output_root.to_path_buf(),
        ..HarvestConfig::default()
    })
}

/// Mounts a two-record catalog: record 101 ("Mochi") with two distinct
/// images, record 102 ("Suzu") whose only image duplicates one of 101's.
async fn mount_catalog(server: &MockServer) {
    let listing = serde_json::json!({
        "foster_list": [
            {"cat_id": 101, "cat_name": "Mochi", "url": "/foster/101/"},
            {"cat_id": 102, "cat_name": "Suzu", "url": "/foster/102/"}
        ],
        "page": {"now": 1, "all_page": 1, "rows": 2}
    });
    Mock::given(method("POST"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(&listing))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/foster/api/detail/101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "display_name": "Mochi",
            "metadata": {"sex": "female", "age": "2"},
            "images": ["/img/101_a.png", "/img/101_b.png"]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/foster/api/detail/102"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "display_name": "Suzu",
            "metadata": {},
            "images": ["/img/102_a.png"]
        })))
        .mount(server)
        .await;

    let image_a = png_bytes(200, 200, 1);
    let image_b = png_bytes(200, 200, 2);
    Mock::given(method("GET"))
        .and(path("/img/101_a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image_a))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/101_b.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image_b.clone()))
        .mount(server)
        .await;
    // Same bytes as 101_b: an exact duplicate across records.
    Mock::given(method("GET"))
        .and(path("/img/102_a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image_b))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_harvest_clean_reorganize_end_to_end() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let raw = tempfile::TempDir::new().unwrap();
    let dataset = tempfile::TempDir::new().unwrap();

    mount_catalog(&server).await;

    // Harvest.
    let config = harvest_config(&server.uri(), raw.path());
    let stats = run_harvest(Arc::clone(&config), false, CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(stats.records_completed(), 2);
    assert_eq!(stats.images_downloaded(), 3);
    assert_eq!(stats.images_failed(), 0);
    assert!(raw.path().join("101").join("info.json").exists());
    assert!(raw.path().join("102").join("info.json").exists());

    // Clean: the cross-record duplicate must fall, emptying record 102.
    let clean_config = CleanConfig {
        min_bytes: 0,
        ..CleanConfig::default()
    };
    let report = run_clean(raw.path(), &clean_config, &FixedClassifier::accept_all()).unwrap();
    assert_eq!(report.images_considered, 3);
    assert_eq!(report.images_kept, 2);
    assert_eq!(report.images_rejected.get("duplicate_content"), Some(&1));
    assert_eq!(report.records_emptied, vec![RecordId::from("102")]);

    // Reorganize: only the record with kept images appears.
    let summary = run_reorganize(raw.path(), dataset.path()).unwrap();
    assert_eq!(summary.record_count, 1);
    assert_eq!(summary.image_count, 2);
    assert_eq!(summary.records[0].directory, "0001_mochi");
    assert!(dataset.path().join("0001_mochi/image_001.png").exists());
    assert!(dataset.path().join("0001_mochi/image_002.png").exists());
    assert!(dataset.path().join("0001_mochi/info.json").exists());
    assert!(dataset.path().join("summary.json").exists());

    // Provenance survives into the final tree.
    let info: serde_json::Value = serde_json::from_slice(
        &std::fs::read(dataset.path().join("0001_mochi/info.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(info["display_name"], "Mochi");
    assert_eq!(info["metadata"]["sex"], "female");
    assert!(
        info["images"]["image_001.png"]
            .as_str()
            .unwrap()
            .contains("/img/101_a.png")
    );
}

#[tokio::test]
async fn test_rate_limited_detail_fetch_is_retried() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let raw = tempfile::TempDir::new().unwrap();

    let listing = serde_json::json!({
        "foster_list": [
            {"cat_id": 201, "cat_name": "Kuro", "url": "/foster/201/"}
        ],
        "page": {"now": 1, "all_page": 1, "rows": 1}
    });
    Mock::given(method("POST"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(&listing))
        .mount(&server)
        .await;

    // First detail request is throttled with a Retry-After; the harvester
    // must honor it and come back rather than failing the record.
    Mock::given(method("GET"))
        .and(path("/foster/api/detail/201"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "1"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/foster/api/detail/201"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "display_name": "Kuro",
            "metadata": {},
            "images": ["/img/201_a.png"]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/201_a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(64, 64, 5)))
        .mount(&server)
        .await;

    let config = harvest_config(&server.uri(), raw.path());
    let stats = run_harvest(config, false, CancelFlag::new()).await.unwrap();

    assert_eq!(stats.records_completed(), 1);
    assert_eq!(stats.records_failed(), 0);
    assert_eq!(stats.images_downloaded(), 1);
}

#[tokio::test]
async fn test_second_harvest_run_is_a_cheap_resume() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let raw = tempfile::TempDir::new().unwrap();

    mount_catalog(&server).await;

    let config = harvest_config(&server.uri(), raw.path());
    let first = run_harvest(Arc::clone(&config), false, CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(first.records_completed(), 2);

    // Everything is checkpointed; the second run must not redo any record.
    let second = run_harvest(Arc::clone(&config), false, CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(second.records_attempted(), 0);
    assert_eq!(second.images_downloaded(), 0);
}

#[tokio::test]
async fn test_fresh_flag_discards_checkpoint() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let raw = tempfile::TempDir::new().unwrap();

    mount_catalog(&server).await;

    let config = harvest_config(&server.uri(), raw.path());
    run_harvest(Arc::clone(&config), false, CancelFlag::new())
        .await
        .unwrap();

    // A fresh run rediscovers both records; images on disk are still
    // reused rather than re-downloaded.
    let fresh = run_harvest(Arc::clone(&config), true, CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(fresh.records_attempted(), 2);
    assert_eq!(fresh.images_downloaded(), 0);
    assert_eq!(fresh.images_skipped(), 3);
}

#[tokio::test]
async fn test_cleaning_report_is_deterministic_across_identical_stores() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };

    mount_catalog(&server).await;
    let clean_config = CleanConfig {
        min_bytes: 0,
        ..CleanConfig::default()
    };

    let mut serialized = Vec::new();
    for _ in 0..2 {
        let raw = tempfile::TempDir::new().unwrap();
        let config = harvest_config(&server.uri(), raw.path());
        run_harvest(config, false, CancelFlag::new()).await.unwrap();

        let report =
            run_clean(raw.path(), &clean_config, &FixedClassifier::accept_all()).unwrap();
        serialized.push(serde_json::to_string(&report).unwrap());
    }
    assert_eq!(serialized[0], serialized[1]);
}
