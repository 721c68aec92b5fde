//! End-to-end tests for the tracker, event store and flush pipeline
//!
//! These tests run against an on-disk database in a temp dir and a local
//! mock collection server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use trackline_core::config::{FlushConfig, StorageConfig};
use trackline_core::{
    Config, CustomerAttribute, Database, Error, FlushMode, FlushOutcome, HttpSender, Payload,
    Properties, StaticConnectivity, Tracker,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "projectToken";
const AUTHORIZATION: &str = "Token secret";

fn flush_config(base_url: &str, max_tries: u32) -> FlushConfig {
    FlushConfig {
        base_url: Some(base_url.to_string()),
        project_token: Some(TOKEN.to_string()),
        authorization: Some(AUTHORIZATION.to_string()),
        max_tries,
        flush_mode: FlushMode::Manual,
        timeout_secs: 5,
        ..Default::default()
    }
}

fn open_db(dir: &TempDir) -> Arc<Database> {
    let db = Database::open(&dir.path().join("events.db")).expect("failed to open db");
    db.migrate().expect("failed to migrate db");
    Arc::new(db)
}

fn start_tracker(config: &FlushConfig, db: &Arc<Database>, online: bool) -> Tracker {
    Tracker::start(
        config,
        Arc::clone(db),
        Arc::new(HttpSender::new(Duration::from_secs(5)).unwrap()),
        Arc::new(StaticConnectivity::new(online)),
    )
    .expect("failed to start tracker")
}

fn props(pairs: &[(&str, &str)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
        .collect()
}

// ============================================
// Durability
// ============================================

#[tokio::test]
async fn test_events_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = flush_config("http://127.0.0.1:1", 10);

    let before = {
        let db = open_db(&dir);
        let tracker = start_tracker(&config, &db, false);
        tracker.track_event("first", props(&[("step", "1")]));
        tracker.track_event("second", props(&[("step", "2")]));
        tracker.track_push_token("token-1");
        tracker.shutdown().await;
        db.all().unwrap()
    };
    assert_eq!(before.len(), 3);

    let db = open_db(&dir);
    let after = db.all().unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_customer_cookie_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = flush_config("http://127.0.0.1:1", 10);

    let first = {
        let db = open_db(&dir);
        let tracker = start_tracker(&config, &db, false);
        let ids = tracker.customer_ids();
        tracker.shutdown().await;
        ids
    };

    let db = open_db(&dir);
    let tracker = start_tracker(&config, &db, false);
    assert_eq!(tracker.customer_ids(), first);
    tracker.shutdown().await;
}

// ============================================
// Delivery
// ============================================

#[tokio::test]
async fn test_flush_delivers_to_routed_endpoints() {
    let server = MockServer::start().await;
    for endpoint in ["customers", "customers/events", "campaigns/clicks"] {
        Mock::given(method("POST"))
            .and(path(format!("/track/v2/projects/{}/{}", TOKEN, endpoint)))
            .and(header("Authorization", AUTHORIZATION))
            .and(header("Content-Type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"success":true}"#))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let tracker = start_tracker(&flush_config(&server.uri(), 3), &db, true);

    tracker.identify_customer("ada@example.com", props(&[("plan", "pro")]));
    tracker.track_event("purchase_started", props(&[("cart", "c-1")]));
    tracker.track_campaign_click("https://example.com/?utm_source=mail&utm_campaign=launch");

    let outcome = tracker.flush_data().await.expect("flush should run");
    assert_eq!(outcome.delivered, 3);
    assert_eq!(outcome.dropped(), 0);
    assert_eq!(tracker.pending_count().unwrap(), 0);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);

    let event: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(event["event_type"], "purchase_started");
    assert_eq!(event["properties"]["cart"], "c-1");
    assert_eq!(event["customer_ids"]["registered"], "ada@example.com");

    let click: serde_json::Value = serde_json::from_slice(&requests[2].body).unwrap();
    assert_eq!(click["properties"]["utm_campaign"], "launch");

    tracker.shutdown().await;
}

#[tokio::test]
async fn test_failed_event_is_retried_on_next_flush() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let tracker = start_tracker(&flush_config(&server.uri(), 3), &db, true);
    let id = tracker.track_event("checkout", Properties::new()).unwrap();

    let first = tracker.flush_data().await.unwrap();
    assert_eq!(first.pending, 1);
    assert_eq!(db.get(id).unwrap().unwrap().attempt_count, 1);

    let second = tracker.flush_data().await.unwrap();
    assert_eq!(second.delivered, 1);
    assert!(db.get(id).unwrap().is_none());

    tracker.shutdown().await;
}

#[tokio::test]
async fn test_event_dropped_after_max_tries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let tracker = start_tracker(&flush_config(&server.uri(), 2), &db, true);
    tracker.track_event("doomed", Properties::new());

    let first = tracker.flush_data().await.unwrap();
    assert_eq!(first.pending, 1);
    let second = tracker.flush_data().await.unwrap();
    assert_eq!(second.dropped_exhausted, 1);
    assert_eq!(tracker.pending_count().unwrap(), 0);

    let third = tracker.flush_data().await.unwrap();
    assert_eq!(third.attempted, 0);

    tracker.shutdown().await;
}

#[tokio::test]
async fn test_offline_flush_keeps_events() {
    let server = MockServer::start().await;

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let tracker = start_tracker(&flush_config(&server.uri(), 1), &db, false);

    let finished: Arc<Mutex<Vec<FlushOutcome>>> = Arc::default();
    let sink = Arc::clone(&finished);
    tracker.set_on_flush_finish(move |outcome| sink.lock().unwrap().push(*outcome));

    tracker.track_event("queued", Properties::new());
    let outcome = tracker.flush_data().await.unwrap();

    assert!(outcome.offline);
    assert_eq!(tracker.pending_count().unwrap(), 1);
    assert_eq!(*finished.lock().unwrap(), vec![FlushOutcome::offline()]);
    assert!(server.received_requests().await.unwrap().is_empty());

    let record = &db.all().unwrap()[0];
    assert_eq!(record.attempt_count, 0);
    assert!(matches!(record.payload, Payload::Properties(_)));

    tracker.shutdown().await;
}

// ============================================
// Fetching
// ============================================

#[tokio::test]
async fn test_fetch_customer_attributes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/data/v2/projects/{}/customers/attributes", TOKEN)))
        .and(header("Authorization", AUTHORIZATION))
        .and(body_partial_json(serde_json::json!({
            "attributes": [{"type": "aggregate", "id": "aggregationId"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"success": true, "results": [{"success": true, "value": "Aggregation"}]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let tracker = start_tracker(&flush_config(&server.uri(), 3), &db, true);

    let results = tracker
        .fetch_customer_attributes(&[CustomerAttribute::Aggregation("aggregationId".to_string())])
        .await
        .expect("fetch should succeed");
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].value, "Aggregation");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(
        body["customer_ids"]["cookie"].as_str(),
        tracker.customer_ids().cookie.as_deref()
    );
    // Fetches are not queued.
    assert_eq!(tracker.pending_count().unwrap(), 0);

    tracker.shutdown().await;
}

#[tokio::test]
async fn test_fetch_customer_attributes_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/data/v2/projects/{}/customers/attributes", TOKEN)))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"success": false}"#))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let tracker = start_tracker(&flush_config(&server.uri(), 3), &db, true);

    let result = tracker
        .fetch_customer_attributes(&[CustomerAttribute::Expression("expr".to_string())])
        .await;
    assert!(matches!(
        result,
        Err(Error::ServerRejection { status: 400, .. })
    ));

    tracker.shutdown().await;
    assert!(matches!(
        tracker.fetch_customer_attributes(&[]).await,
        Err(Error::Shutdown)
    ));
}

// ============================================
// Configuration
// ============================================

#[tokio::test]
async fn test_tracker_from_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/track/v2/projects/{}/customers/events", TOKEN)))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("events.db");
    let config = Config {
        flush: flush_config(&server.uri(), 3),
        storage: StorageConfig {
            database_path: Some(db_path.clone()),
        },
        ..Default::default()
    };

    let tracker = Tracker::from_config(&config).expect("tracker should start");
    tracker.track_session_start();
    let outcome = tracker.flush_data().await.unwrap();
    assert_eq!(outcome.delivered, 1);
    tracker.shutdown().await;

    assert!(db_path.exists());
}

#[tokio::test]
async fn test_from_config_rejects_missing_endpoint() {
    let result = Tracker::from_config(&Config::default());
    assert!(matches!(result, Err(Error::Config(_))));
}
