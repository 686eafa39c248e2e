//! Read API tests: bootstrapping, pagination and HTTP status mapping

use crate::common::{harness, page, test_config, video, SEARCH_PATH};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use video_harvest::api::{router, AppState, Bootstrapper, PageRequest};
use video_harvest::storage::{self, NewItem, SharedStorage, Storage};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn app(bootstrapper: Bootstrapper) -> axum::Router {
    router(Arc::new(AppState { bootstrapper }))
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn seed_items(storage: &SharedStorage, query: &str, count: usize) {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let items: Vec<NewItem> = (0..count)
        .map(|i| NewItem {
            external_id: format!("{}-{}", query, i),
            title: format!("Item {}", i),
            description: String::new(),
            published_at: base + ChronoDuration::minutes(i as i64),
            thumbnail_url: String::new(),
            query: query.to_string(),
        })
        .collect();
    storage::lock(storage).unwrap().insert_items(&items).unwrap();
}

#[tokio::test]
async fn test_cold_query_bootstraps_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("q", "valorant"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![
                video("v-old", "2024-06-01T10:00:00Z"),
                video("v-new", "2024-06-05T10:00:00Z"),
            ],
            None,
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, storage) = harness(&config);
    let app = app(Bootstrapper::new(cycle));

    let (status, body) = get(app.clone(), "/api/videos?q=valorant").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["results"][0]["external_id"], "v-new");
    assert_eq!(body["results"][0]["published_at"], "2024-06-05T10:00:00Z");
    assert_eq!(body["results"][1]["external_id"], "v-old");

    // Warm read is served from storage
    let (status, body) = get(app, "/api/videos?q=valorant").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let guard = storage::lock(&storage).unwrap();
    let schedules = guard.list_schedules().unwrap();
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0].name, "fetch_videos:valorant");
}

#[tokio::test]
async fn test_concurrent_cold_reads_fetch_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(vec![video("v1", "2024-06-01T10:00:00Z")], None))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, _storage) = harness(&config);
    let bootstrapper = Bootstrapper::new(cycle);

    let (a, b) = tokio::join!(
        bootstrapper.list(Some("pubg"), PageRequest::default()),
        bootstrapper.list(Some("pubg"), PageRequest::default()),
    );

    assert_eq!(a.unwrap().count, 1);
    assert_eq!(b.unwrap().count, 1);
}

#[tokio::test]
async fn test_failed_bootstrap_returns_empty_page() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, storage) = harness(&config);

    let (status, body) = get(app(Bootstrapper::new(cycle)), "/api/videos?q=apex").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
    assert_eq!(body["results"], serde_json::json!([]));

    // Still registered, so the scheduler keeps trying
    assert!(storage::lock(&storage)
        .unwrap()
        .get_schedule("fetch_videos:apex")
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_default_query_and_pagination() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, storage) = harness(&config);
    seed_items(&storage, "bgmi", 25);
    let app = app(Bootstrapper::new(cycle));

    let (status, body) = get(app.clone(), "/api/videos").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 25);
    assert_eq!(body["results"].as_array().unwrap().len(), 10);
    assert_eq!(body["results"][0]["external_id"], "bgmi-24");

    let (status, body) = get(app.clone(), "/api/videos?q=bgmi&page=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 5);
    assert_eq!(body["results"][4]["external_id"], "bgmi-0");

    let (status, body) = get(app, "/api/videos?q=bgmi&page=4").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Invalid page.");
}

#[tokio::test]
async fn test_page_size_is_capped() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, storage) = harness(&config);
    seed_items(&storage, "bgmi", 120);

    let (status, body) = get(
        app(Bootstrapper::new(cycle)),
        "/api/videos?q=bgmi&page_size=500",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 120);
    assert_eq!(body["results"].as_array().unwrap().len(), 100);
}

#[tokio::test]
async fn test_bad_parameters_are_rejected() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, storage) = harness(&config);
    seed_items(&storage, "bgmi", 3);
    let app = app(Bootstrapper::new(cycle));

    let (status, _) = get(app.clone(), "/api/videos?page_size=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(app.clone(), "/api/videos?page=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(app.clone(), "/api/videos?page=-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long_query = "x".repeat(101);
    let (status, _) = get(app, &format!("/api/videos?q={}", long_query)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, _storage) = harness(&config);

    let response = app(Bootstrapper::new(cycle))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}
