use super::{app_router, AppState, StateConfig};
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use depot_core::{
    ArtifactStore, FsArtifactStore, MonotonicClock, RetentionConfig, ThrottleConfig,
    TriggerConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "0123456789abcdef0123456789abcdef";

fn relaxed_throttle() -> ThrottleConfig {
    ThrottleConfig {
        max_fast_requests_per_window: 1000,
        max_slow_requests_per_window: 1000,
        ..ThrottleConfig::default()
    }
}

fn setup(dir: &TempDir, throttle: ThrottleConfig, retention: RetentionConfig) -> (Router, AppState) {
    setup_with_proxy(dir, throttle, retention, true)
}

fn setup_with_proxy(
    dir: &TempDir,
    throttle: ThrottleConfig,
    retention: RetentionConfig,
    trust_proxy_headers: bool,
) -> (Router, AppState) {
    let store = Arc::new(FsArtifactStore::new(dir.path()));
    store.ensure_dirs().unwrap();
    let state = AppState::new(
        store,
        StateConfig {
            throttle,
            retention,
            retention_trigger: TriggerConfig::new(Duration::ZERO),
            snapshot_trigger: TriggerConfig::new(Duration::from_secs(3600)),
            admin_token: Some(ADMIN_TOKEN.to_string()),
            trust_proxy_headers,
        },
        Arc::new(MonotonicClock::new()),
    )
    .unwrap();
    (app_router(state.clone()), state)
}

fn get(uri: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-Real-IP", ip)
        .body(Body::empty())
        .unwrap()
}

fn put(uri: &str, ip: &str, body: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("X-Real-IP", ip)
        .body(Body::from(body))
        .unwrap()
}

fn snapshot_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/admin/snapshot")
        .header("X-Real-IP", "10.9.9.9");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn health_is_never_throttled() {
    let dir = TempDir::new().unwrap();
    let throttle = ThrottleConfig {
        max_fast_requests_per_window: 1,
        ..ThrottleConfig::default()
    };
    let (app, _) = setup(&dir, throttle, RetentionConfig::default());

    for _ in 0..5 {
        let response = app.clone().oneshot(get("/health", "10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn throttled_client_gets_rate_limit_response() {
    let dir = TempDir::new().unwrap();
    let throttle = ThrottleConfig {
        max_fast_requests_per_window: 2,
        window_interval: Duration::from_secs(60),
        fast_ban_duration: Duration::from_secs(30),
        ..ThrottleConfig::default()
    };
    let (app, state) = setup(&dir, throttle, RetentionConfig::default());

    for _ in 0..2 {
        let response = app.clone().oneshot(get("/artifacts", "10.0.0.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.clone().oneshot(get("/artifacts", "10.0.0.2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 30);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["code"], "TooManyRequests");
    assert!(body["message"].as_str().unwrap().contains("try again in"));

    // 其他客户端不受影响
    let response = app.clone().oneshot(get("/artifacts", "10.0.0.3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.throttler.remaining_ban_time("10.0.0.2") > Duration::ZERO);
}

#[tokio::test]
async fn rotating_forwarded_headers_do_not_evade_throttle() {
    let dir = TempDir::new().unwrap();
    let throttle = ThrottleConfig {
        max_fast_requests_per_window: 2,
        window_interval: Duration::from_secs(60),
        ..ThrottleConfig::default()
    };
    let (app, state) = setup_with_proxy(&dir, throttle, RetentionConfig::default(), false);

    let mut statuses = Vec::new();
    for i in 0..4 {
        let ip = format!("10.66.0.{i}");
        let response = app.clone().oneshot(get("/artifacts", &ip)).await.unwrap();
        statuses.push(response.status());
    }

    assert_eq!(statuses[..2], [StatusCode::OK, StatusCode::OK]);
    assert_eq!(statuses[2], StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(state.throttler.tracked_visitors(), 1);
}

#[tokio::test]
async fn upload_download_and_list() {
    let dir = TempDir::new().unwrap();
    let (app, _) = setup(&dir, relaxed_throttle(), RetentionConfig::default());

    let response = app
        .clone()
        .oneshot(put("/artifacts/build-42.zip", "10.0.0.4", b"artifact-bytes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(get("/artifacts/build-42.zip", "10.0.0.4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"artifact-bytes");

    let response = app.clone().oneshot(get("/artifacts", "10.0.0.4")).await.unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let listing: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(listing[0]["name"], "build-42.zip");

    let response = app
        .clone()
        .oneshot(get("/artifacts/missing.zip", "10.0.0.4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn uploads_trigger_retention_sweep() {
    let dir = TempDir::new().unwrap();
    let retention = RetentionConfig {
        max_artifacts: 2,
        sweep_percent: 50,
    };
    let (app, state) = setup(&dir, relaxed_throttle(), retention);

    for name in ["a1.bin", "a2.bin", "a3.bin"] {
        let uri = format!("/artifacts/{name}");
        let response = app.clone().oneshot(put(&uri, "10.0.0.5", b"x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let artifacts_dir = dir.path().join("artifacts");
    wait_for(|| {
        std::fs::read_dir(&artifacts_dir)
            .map(|entries| entries.count() == 2)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(state.store.total_artifact_count().await.unwrap(), 2);
    assert!(state.retention.stats().runs >= 1);
}

#[tokio::test]
async fn snapshot_requires_admin_token() {
    let dir = TempDir::new().unwrap();
    let (app, state) = setup(&dir, relaxed_throttle(), RetentionConfig::default());

    let response = app.clone().oneshot(snapshot_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(snapshot_request(Some("wrong-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(snapshot_request(Some(ADMIN_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let path = state.store.snapshot_path();
    wait_for(|| path.exists()).await;
    let snapshot: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(snapshot["reason"], "operator");
}

#[tokio::test]
async fn maintenance_status_reports_workers() {
    let dir = TempDir::new().unwrap();
    let (app, _) = setup(&dir, relaxed_throttle(), RetentionConfig::default());

    let request = Request::builder()
        .uri("/admin/maintenance")
        .header("X-Real-IP", "10.0.0.6")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["retention"]["running"], true);
    assert_eq!(status["snapshot"]["stats"]["runs"], 0);
    assert_eq!(status["tracked_visitors"], 1);
}
