//! End-to-end tests of the REST quota store against a local server
//! speaking the same command protocol.

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use meter_rs::server::{router, AppState};
use meter_rs::{Outcome, QuotaPolicy, QuotaStore, RestStore, StoreError, UsageMeter, UsageRecord};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const TOKEN: &str = "test-token";

#[derive(Default)]
struct FakeStore {
    entries: Mutex<HashMap<String, String>>,
    reject_sets: AtomicBool,
    delay_ms: AtomicUsize,
    commands: AtomicUsize,
}

impl FakeStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

async fn handle_command(
    State(fake): State<Arc<FakeStore>>,
    headers: HeaderMap,
    Json(args): Json<Vec<String>>,
) -> Response {
    fake.commands.fetch_add(1, Ordering::SeqCst);

    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false);
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response();
    }

    let delay = fake.delay_ms.load(Ordering::SeqCst) as u64;
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    match args.first().map(String::as_str) {
        Some("GET") if args.len() == 2 => Json(json!({"result": fake.get(&args[1])})).into_response(),
        Some("SET") if args.len() == 3 => {
            if fake.reject_sets.load(Ordering::SeqCst) {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "ERR max daily request limit exceeded"})),
                )
                    .into_response();
            }
            fake.put(&args[1], &args[2]);
            Json(json!({"result": "OK"})).into_response()
        }
        _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "ERR unknown command"}))).into_response(),
    }
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn start_fake() -> (Arc<FakeStore>, String) {
    let fake = Arc::new(FakeStore::default());
    let app = Router::new()
        .route("/", post(handle_command))
        .with_state(fake.clone());
    let url = serve(app).await;
    (fake, url)
}

fn rest_store(url: &str, token: &str, timeout_ms: u64) -> Arc<RestStore> {
    Arc::new(
        RestStore::new(
            Some(url.to_string()),
            Some(token.to_string()),
            Duration::from_millis(timeout_ms),
        )
        .unwrap(),
    )
}

fn meter(store: Arc<RestStore>) -> UsageMeter {
    UsageMeter::new(store, QuotaPolicy::new(3, ["owner@example.com"]))
}

#[tokio::test]
async fn test_get_set_round_trip() {
    let (fake, url) = start_fake().await;
    let store = rest_store(&url, TOKEN, 2000);

    assert_eq!(store.fetch("usage:a@example.com").await, Ok(None));
    store.store("usage:a@example.com", r#"{"count":1}"#).await.unwrap();
    assert_eq!(
        store.fetch("usage:a@example.com").await,
        Ok(Some(r#"{"count":1}"#.to_string()))
    );
    assert_eq!(fake.commands.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_meter_counts_through_rest_store() {
    let (fake, url) = start_fake().await;
    let meter = meter(rest_store(&url, TOKEN, 2000));

    let checked = meter.check("new@x.com").await.unwrap();
    assert_eq!((checked.count, checked.allowed), (0, true));

    let expected = [(1, true), (2, true), (3, false)];
    for (count, allowed) in expected {
        let decision = meter.record_and_check("new@x.com").await.unwrap();
        assert_eq!(decision.count, count);
        assert_eq!(decision.allowed, allowed);
        assert_eq!(decision.outcome, Outcome::Metered);
    }

    let stored = UsageRecord::decode(&fake.get("usage:new@x.com").unwrap()).unwrap();
    assert_eq!(stored.count, 3);
    assert!(stored.first_used.is_some());
    assert!(stored.first_used <= stored.last_used);
}

#[tokio::test]
async fn test_exempt_issues_no_commands() {
    let (fake, url) = start_fake().await;
    let meter = meter(rest_store(&url, TOKEN, 2000));

    let decision = meter.record_and_check("Owner@Example.com").await.unwrap();
    assert_eq!(decision.outcome, Outcome::Exempt);
    assert_eq!(fake.commands.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wrong_token_fails_open() {
    let (fake, url) = start_fake().await;
    let store = rest_store(&url, "wrong-token", 2000);

    assert!(matches!(
        store.fetch("usage:a@example.com").await,
        Err(StoreError::Unavailable(_))
    ));

    let decision = meter(store).record_and_check("a@example.com").await.unwrap();
    assert_eq!(decision.outcome, Outcome::FailOpen);
    assert!(decision.allowed);
    assert!(fake.get("usage:a@example.com").is_none());
}

#[tokio::test]
async fn test_rejected_write_keeps_previous_count() {
    let (fake, url) = start_fake().await;
    fake.put("usage:user@example.com", r#"{"count":2,"firstUsed":"2024-01-01T00:00:00Z"}"#);
    fake.reject_sets.store(true, Ordering::SeqCst);

    let decision = meter(rest_store(&url, TOKEN, 2000))
        .record_and_check("user@example.com")
        .await
        .unwrap();
    assert_eq!(decision.count, 2);
    assert!(decision.allowed);
    assert_eq!(decision.outcome, Outcome::WriteFailed);

    let stored = UsageRecord::decode(&fake.get("usage:user@example.com").unwrap()).unwrap();
    assert_eq!(stored.count, 2);
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let (fake, url) = start_fake().await;
    fake.delay_ms.store(1000, Ordering::SeqCst);
    let store = rest_store(&url, TOKEN, 100);

    assert!(matches!(
        store.fetch("usage:a@example.com").await,
        Err(StoreError::Unavailable(_))
    ));

    let decision = meter(store).check("a@example.com").await.unwrap();
    assert_eq!(decision.outcome, Outcome::FailOpen);
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_unreachable_store_fails_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let store = rest_store(&url, TOKEN, 2000);
    assert!(matches!(
        store.store("usage:a@example.com", "{}").await,
        Err(StoreError::Unavailable(_))
    ));

    let decision = meter(store).record_and_check("a@example.com").await.unwrap();
    assert_eq!(decision.outcome, Outcome::FailOpen);
    assert_eq!(decision.count, 0);
}

#[tokio::test]
async fn test_malformed_stored_value_counts_from_zero() {
    let (fake, url) = start_fake().await;
    fake.put("usage:user@example.com", "count=5");

    let meter = meter(rest_store(&url, TOKEN, 2000));
    assert_eq!(meter.check("user@example.com").await.unwrap().count, 0);
    assert_eq!(meter.record_and_check("user@example.com").await.unwrap().count, 1);
}

#[tokio::test]
async fn test_http_surface_over_rest_store() {
    let (fake, store_url) = start_fake().await;
    let meter = Arc::new(meter(rest_store(&store_url, TOKEN, 2000)));
    let meter_url = serve(router(Arc::new(AppState { meter }))).await;

    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/usage", meter_url))
        .json(&json!({"email": " Foo@Bar.com "}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["email"], "foo@bar.com");
    assert_eq!(body["count"], 1);
    assert_eq!(body["allowed"], true);

    let response = client
        .get(format!("{}/usage?email=foo@bar.com", meter_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["count"], 1);

    assert!(fake.get("usage:foo@bar.com").is_some());
}
