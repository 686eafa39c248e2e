//! Fetch cycle tests against a mock upstream

use crate::common::{harness, page, quota_body, test_config, video, SEARCH_PATH};
use std::time::Duration;
use video_harvest::ingest::CycleOutcome;
use video_harvest::storage::{self, RunStatus, Storage};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ingested(outcome: CycleOutcome) -> video_harvest::ingest::CycleReport {
    match outcome {
        CycleOutcome::Ingested(report) => report,
        other => panic!("expected an ingested page, got {:?}", other),
    }
}

#[tokio::test]
async fn test_first_cycle_for_new_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(header("accept", "application/json"))
        .and(query_param("part", "snippet"))
        .and(query_param("q", "bgmi"))
        .and(query_param("maxResults", "10"))
        .and(query_param("order", "date"))
        .and(query_param("type", "video"))
        .and(query_param("key", "k1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![
                video("vid-2", "2024-06-02T10:00:00Z"),
                video("vid-1", "2024-06-01T10:00:00Z"),
            ],
            None,
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["k1", "k2"]);
    let (cycle, storage) = harness(&config);

    let report = ingested(cycle.run("bgmi").await.unwrap());
    assert_eq!(report.fetched, 2);
    assert_eq!(report.new_items, 2);
    assert_eq!(report.next_cursor, None);

    let guard = storage::lock(&storage).unwrap();
    assert_eq!(guard.count_items("bgmi").unwrap(), 2);
    assert_eq!(guard.cache_get("page_token:bgmi").unwrap(), None);

    let schedules = guard.list_schedules().unwrap();
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0].name, "fetch_videos:bgmi");
    assert!(schedules[0].last_run_at.is_some());

    let items = guard.list_items("bgmi", 0, 10).unwrap();
    assert_eq!(items[0].external_id, "vid-2");
    assert_eq!(items[0].title, "Video vid-2");
    assert_eq!(
        items[0].thumbnail_url,
        "https://i.example.com/vi/vid-2/default.jpg"
    );

    let run = guard.get_latest_run("bgmi").unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Ingested);
    assert_eq!(run.new_items, 2);
}

#[tokio::test]
async fn test_cursor_walks_pages_then_clears() {
    let mock_server = MockServer::start().await;

    // Continuation request, mounted first so it wins over the fresh walk
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("pageToken", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![video("vid-1", "2024-06-01T10:00:00Z")],
            None,
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![video("vid-2", "2024-06-02T10:00:00Z")],
            Some("abc"),
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, storage) = harness(&config);

    let first = ingested(cycle.run("bgmi").await.unwrap());
    assert_eq!(first.next_cursor.as_deref(), Some("abc"));
    assert_eq!(
        storage::lock(&storage)
            .unwrap()
            .cache_get("page_token:bgmi")
            .unwrap()
            .as_deref(),
        Some("abc")
    );

    let second = ingested(cycle.run("bgmi").await.unwrap());
    assert_eq!(second.new_items, 1);
    assert_eq!(second.next_cursor, None);

    let guard = storage::lock(&storage).unwrap();
    assert_eq!(guard.cache_get("page_token:bgmi").unwrap(), None);
    assert_eq!(guard.count_items("bgmi").unwrap(), 2);
}

#[tokio::test]
async fn test_overlapping_pages_are_deduplicated() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![
                video("a", "2024-06-03T10:00:00Z"),
                video("b", "2024-06-02T10:00:00Z"),
            ],
            None,
        )))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![
                video("b", "2024-06-02T10:00:00Z"),
                video("c", "2024-06-01T10:00:00Z"),
                video("c", "2024-06-01T10:00:00Z"),
            ],
            None,
        )))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, storage) = harness(&config);

    assert_eq!(ingested(cycle.run("bgmi").await.unwrap()).new_items, 2);

    let second = ingested(cycle.run("bgmi").await.unwrap());
    assert_eq!(second.new_items, 1);
    assert_eq!(second.skipped_existing, 2);

    assert_eq!(storage::lock(&storage).unwrap().count_total_items().unwrap(), 3);
}

#[tokio::test]
async fn test_malformed_entries_do_not_abort_page() {
    let mock_server = MockServer::start().await;

    let mut missing_thumbnail = video("no-thumb", "2024-06-02T10:00:00Z");
    missing_thumbnail["snippet"]["thumbnails"] = serde_json::json!({});

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![
                video("good-1", "2024-06-04T10:00:00Z"),
                video("bad-ts", "04/06/2024 10:00"),
                missing_thumbnail,
                serde_json::json!({"id": {"kind": "youtube#channel", "channelId": "UC1"}}),
                video("good-2", "2024-06-01T10:00:00Z"),
            ],
            Some("next"),
        )))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, storage) = harness(&config);

    let report = ingested(cycle.run("bgmi").await.unwrap());
    assert_eq!(report.fetched, 5);
    assert_eq!(report.new_items, 2);
    assert_eq!(report.malformed, 3);

    let guard = storage::lock(&storage).unwrap();
    assert!(guard.item_exists("good-1").unwrap());
    assert!(guard.item_exists("good-2").unwrap());
    assert!(!guard.item_exists("bad-ts").unwrap());
    assert_eq!(
        guard.cache_get("page_token:bgmi").unwrap().as_deref(),
        Some("next")
    );
    assert_eq!(guard.get_latest_run("bgmi").unwrap().unwrap().malformed_items, 3);
}

#[tokio::test]
async fn test_quota_exhaustion_rotates_to_next_credential() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("key", "k1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(quota_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("key", "k2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![video("vid-1", "2024-06-01T10:00:00Z")],
            None,
        )))
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["k1", "k2"]);
    let (cycle, storage) = harness(&config);

    assert_eq!(ingested(cycle.run("bgmi").await.unwrap()).new_items, 1);
    assert_eq!(
        storage::lock(&storage)
            .unwrap()
            .cache_get("credential_index")
            .unwrap()
            .as_deref(),
        Some("1")
    );

    // The rotated credential is shared by later cycles, for any query
    ingested(cycle.run("pubg").await.unwrap());
}

#[tokio::test]
async fn test_single_credential_quota_stops_immediately() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(quota_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["only"]);
    let (cycle, storage) = harness(&config);

    assert_eq!(
        cycle.run("bgmi").await.unwrap(),
        CycleOutcome::QuotaExhausted { attempts: 1 }
    );

    let guard = storage::lock(&storage).unwrap();
    assert_eq!(guard.cache_get("credential_index").unwrap(), None);
    assert_eq!(
        guard.get_latest_run("bgmi").unwrap().unwrap().status,
        RunStatus::QuotaExhausted
    );
}

#[tokio::test]
async fn test_all_credentials_exhausted_is_bounded() {
    let mock_server = MockServer::start().await;

    for key in ["k1", "k2", "k3"] {
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .and(query_param("key", key))
            .respond_with(ResponseTemplate::new(403).set_body_json(quota_body()))
            .expect(2)
            .mount(&mock_server)
            .await;
    }

    let config = test_config(&mock_server.uri(), &["k1", "k2", "k3"]);
    let (cycle, storage) = harness(&config);

    for _ in 0..2 {
        assert_eq!(
            cycle.run("bgmi").await.unwrap(),
            CycleOutcome::QuotaExhausted { attempts: 3 }
        );
    }

    // The last rejected key is rotated away too, so no key repeats early
    let keys: Vec<String> = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter_map(|request| {
            request
                .url
                .query_pairs()
                .find(|(name, _)| name == "key")
                .map(|(_, value)| value.into_owned())
        })
        .collect();
    assert_eq!(keys, vec!["k1", "k2", "k3", "k1", "k2", "k3"]);

    assert_eq!(
        storage::lock(&storage)
            .unwrap()
            .cache_get("credential_index")
            .unwrap()
            .as_deref(),
        Some("0")
    );
}

#[tokio::test]
async fn test_upstream_failure_leaves_state_untouched() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    // A 403 without the quota marker is an ordinary failure
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["k1", "k2"]);
    let (cycle, storage) = harness(&config);
    storage::lock(&storage)
        .unwrap()
        .cache_set("page_token:bgmi", "keep-me")
        .unwrap();

    for _ in 0..2 {
        let outcome = cycle.run("bgmi").await.unwrap();
        assert!(
            matches!(outcome, CycleOutcome::UpstreamFailed { .. }),
            "unexpected outcome {:?}",
            outcome
        );
    }

    let guard = storage::lock(&storage).unwrap();
    assert_eq!(
        guard.cache_get("page_token:bgmi").unwrap().as_deref(),
        Some("keep-me")
    );
    assert_eq!(guard.cache_get("credential_index").unwrap(), None);
    assert_eq!(guard.count_total_items().unwrap(), 0);
    assert_eq!(guard.count_runs("bgmi").unwrap(), 2);
}

#[tokio::test]
async fn test_overlapping_cycle_for_same_query_is_skipped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(vec![video("vid-1", "2024-06-01T10:00:00Z")], None))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), &["k1"]);
    let (cycle, _storage) = harness(&config);

    let (first, second) = tokio::join!(cycle.run("bgmi"), cycle.run_if_idle("bgmi"));

    assert_eq!(ingested(first.unwrap()).new_items, 1);
    assert_eq!(second.unwrap(), CycleOutcome::Busy);
}

#[tokio::test]
async fn test_slow_cycle_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(vec![], None))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let mut config = test_config(&mock_server.uri(), &["k1"]);
    config.schedule.cycle_timeout_secs = 1;
    let (cycle, storage) = harness(&config);

    assert_eq!(cycle.run("bgmi").await.unwrap(), CycleOutcome::TimedOut);
    assert_eq!(
        storage::lock(&storage)
            .unwrap()
            .get_latest_run("bgmi")
            .unwrap()
            .unwrap()
            .status,
        RunStatus::TimedOut
    );
}
