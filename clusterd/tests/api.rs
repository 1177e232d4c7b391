use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::Span;

use clusterd::api::{ApiServer, ApiServerConfig, AppState};
use clusterd::coordinator::{Coordinator, CoordinatorConfig};
use clusterd::database::Database;
use clusterd::domain::Job;
use clusterd::notification::{DeliveryPolicy, Notifier};

struct Harness {
    _dir: TempDir,
    media_dir: std::path::PathBuf,
    router: Router,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("api.db").display());
    let db = Database::connect(&url).await.unwrap();
    let media_dir = dir.path().join("media");
    std::fs::create_dir_all(&media_dir).unwrap();

    let notifier = Notifier::new(DeliveryPolicy::default(), CancellationToken::new(), Span::none()).unwrap();
    let coordinator = Coordinator::new(
        &db,
        notifier,
        CoordinatorConfig {
            public_url: "http://manager:8088".to_string(),
            media_dir: media_dir.clone(),
            default_notify_url: None,
        },
    );
    let server = ApiServer::new(
        ApiServerConfig::default(),
        AppState::new(Arc::new(coordinator)),
        CancellationToken::new(),
    );

    Harness {
        _dir: dir,
        media_dir,
        router: server.build_router(),
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_raw(router: &Router, method: &str, uri: &str, body: &'static str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn create_task(router: &Router) -> (i64, i64) {
    let (status, body) = send(
        router,
        "POST",
        "/api/tasks",
        Some(json!({
            "sources": [{ "url": "rtmp://origin/live/s" }],
            "domain_name": "example.com",
            "app_name": "live",
            "stream_name": "s"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&body));
    let created: Value = serde_json::from_slice(&body).unwrap();
    (
        created["task_id"].as_i64().unwrap(),
        created["job_id"].as_i64().unwrap(),
    )
}

fn write_recording(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("index.m3u8"),
        "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:2\n#EXT-X-MAP:URI=\"init.mp4\"\n\
         #EXTINF:2.000,\n0.m4s\n#EXTINF:2.000,\n1.m4s\n#EXT-X-ENDLIST\n",
    )
    .unwrap();
    std::fs::write(dir.join("init.mp4"), b"INIT").unwrap();
    std::fs::write(dir.join("0.m4s"), b"seg0").unwrap();
    std::fs::write(dir.join("1.m4s"), b"seg1").unwrap();
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness().await;
    let (status, body) = send(&h.router, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn lease_report_and_complete() {
    let h = harness().await;
    let (_task_id, job_id) = create_task(&h.router).await;

    let (status, body) = send(&h.router, "POST", "/api/runners/r1/lease", None).await;
    assert_eq!(status, StatusCode::OK);
    let job: Job = serde_json::from_slice(&body).unwrap();
    assert_eq!(job.id, job_id);
    assert_eq!(job.runner.as_deref(), Some("r1"));

    let (status, _) = send(&h.router, "POST", "/api/runners/r2/lease", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&h.router, "GET", "/api/runners/r1/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    let leased: Vec<Job> = serde_json::from_slice(&body).unwrap();
    assert_eq!(leased.len(), 1);

    let report_uri = format!("/api/jobs/{job_id}/report");
    let (status, _) = send(
        &h.router,
        "POST",
        &report_uri,
        Some(json!({ "job_id": job_id, "kind": "start" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let end = json!({ "job_id": job_id, "kind": "end", "exit_code": 0, "size": 12, "duration_ms": 4000 });
    let (status, _) = send(&h.router, "POST", &report_uri, Some(end.clone())).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&h.router, "GET", &format!("/api/jobs/{job_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let archived: Job = serde_json::from_slice(&body).unwrap();
    assert!(archived.is_archived());
    assert_eq!(archived.exit_code, Some(0));
    assert!(archived.last_seen_time.is_some());

    // The job is no longer active.
    let (status, body) = send(&h.router, "POST", &report_uri, Some(end)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "CONFLICT");
}

#[tokio::test]
async fn report_for_other_job_is_rejected() {
    let h = harness().await;
    let (_, job_id) = create_task(&h.router).await;

    let (status, _) = send(
        &h.router,
        "POST",
        &format!("/api/jobs/{job_id}/report"),
        Some(json!({ "job_id": job_id + 1, "kind": "start" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = harness().await;
    let (status, body) = send(&h.router, "GET", "/api/jobs/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "NOT_FOUND");
}

#[tokio::test]
async fn invalid_task_is_rejected() {
    let h = harness().await;
    let (status, _) = send(&h.router, "POST", "/api/tasks", Some(json!({ "sources": [] }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn deleting_task_cancels_its_job() {
    let h = harness().await;
    let (task_id, job_id) = create_task(&h.router).await;
    send(&h.router, "POST", "/api/runners/r1/lease", None).await;

    let (status, body) = send(&h.router, "DELETE", &format!("/api/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let stopped: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stopped["archived_job_id"].as_i64(), Some(job_id));

    let (_, body) = send(&h.router, "GET", &format!("/api/jobs/{job_id}"), None).await;
    let job: Job = serde_json::from_slice(&body).unwrap();
    assert!(job.is_cancelled());

    // The runner's cancelled report after the fact is accepted.
    let (status, _) = send(
        &h.router,
        "POST",
        &format!("/api/jobs/{job_id}/report"),
        Some(json!({ "job_id": job_id, "kind": "cancelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&h.router, "DELETE", &format!("/api/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_streams_init_and_segments() {
    let h = harness().await;
    let (_, job_id) = create_task(&h.router).await;
    let job_dir = h.media_dir.join(job_id.to_string());
    write_recording(&job_dir);

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/download/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "12");
    assert!(
        response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains(&format!("{job_id}.mp4"))
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"INITseg0seg1");

    // Missing segment fails before any byte is sent.
    std::fs::remove_file(job_dir.join("1.m4s")).unwrap();
    let (status, _) = send(&h.router, "GET", &format!("/api/download/{job_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&h.router, "GET", &format!("/api/download/{job_id}/7.mp4"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&h.router, "GET", &format!("/api/download/{job_id}/..%2Fx"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn callback_rules_can_be_bound() {
    let h = harness().await;
    let (status, body) = send(
        &h.router,
        "POST",
        "/api/callbacks/templates",
        Some(json!({ "name": "default", "record_notify_url": "http://hooks/record" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let template_id = serde_json::from_slice::<Value>(&body).unwrap()["template_id"]
        .as_i64()
        .unwrap();

    let (status, _) = send(
        &h.router,
        "POST",
        "/api/callbacks/rules",
        Some(json!({ "domain_name": "example.com", "template_id": template_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &h.router,
        "POST",
        "/api/callbacks/rules",
        Some(json!({ "domain_name": "example.com", "template_id": template_id + 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&h.router, "GET", "/api/callbacks/rules", None).await;
    assert_eq!(status, StatusCode::OK);
    let rules: Vec<Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["domain_name"], "example.com");
}

#[tokio::test]
async fn malformed_requests_get_error_bodies() {
    let h = harness().await;

    let (status, error) = send_raw(&h.router, "POST", "/api/tasks", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "BAD_REQUEST");
    assert!(error["message"].as_str().is_some_and(|m| !m.is_empty()));

    let (status, error) = send_raw(&h.router, "POST", "/api/tasks", r#"{"sources": 5}"#).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["code"], "VALIDATION_ERROR");

    let (status, error) = send_raw(&h.router, "GET", "/api/jobs/abc", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "BAD_REQUEST");
    assert!(error["message"].as_str().unwrap().contains("abc"));
}

#[tokio::test]
async fn report_before_lease_is_rejected() {
    let h = harness().await;
    let (_, job_id) = create_task(&h.router).await;

    for kind in ["start", "end", "exception", "cancelled"] {
        let (status, body) = send(
            &h.router,
            "POST",
            &format!("/api/jobs/{job_id}/report"),
            Some(json!({ "job_id": job_id, "kind": kind, "exit_code": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT, "{kind}");
        let error: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["code"], "CONFLICT");
    }

    // The job was not consumed.
    let (status, body) = send(&h.router, "POST", "/api/runners/r1/lease", None).await;
    assert_eq!(status, StatusCode::OK);
    let job: Job = serde_json::from_slice(&body).unwrap();
    assert_eq!(job.id, job_id);
    assert!(!job.is_archived());
}

#[tokio::test]
async fn tasks_are_listed() {
    let h = harness().await;
    let (first, _) = create_task(&h.router).await;
    let (second, _) = create_task(&h.router).await;

    let (status, body) = send(&h.router, "GET", "/api/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    let tasks: Vec<Value> = serde_json::from_slice(&body).unwrap();
    let ids: Vec<i64> = tasks.iter().map(|t| t["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(tasks[0]["stream_name"], "s");

    send(&h.router, "DELETE", &format!("/api/tasks/{first}"), None).await;
    let (_, body) = send(&h.router, "GET", "/api/tasks", None).await;
    let tasks: Vec<Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(tasks.len(), 1);
}
