//! HTTP surface driven through the router with an in-memory store and a
//! local archive.

#![allow(clippy::panic, clippy::indexing_slicing)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{Value, json};
use tower::ServiceExt;

use grbt8_backup::api;
use grbt8_backup::app_state::AppState;
use grbt8_backup::archive::{ArchiveStore, LocalArchive, RetryPolicy};
use grbt8_backup::config::BackupSettings;
use grbt8_backup::domain::{EventBus, Row};
use grbt8_backup::persistence::{MemoryStore, Store};
use grbt8_backup::service::{
    BackupService, ConfigService, Dependency, EmailQueueService, PartialReadPolicy,
};

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<MemoryStore>,
    app: Router,
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn harness() -> Harness {
    let Ok(dir) = tempfile::tempdir() else {
        panic!("tempdir should be creatable");
    };
    let store = Arc::new(MemoryStore::new());
    let store_dep: Dependency<Arc<dyn Store>> =
        Dependency::Ready(Arc::clone(&store) as Arc<dyn Store>);
    let archive: Arc<dyn ArchiveStore> = Arc::new(LocalArchive::new(dir.path()));
    let event_bus = EventBus::new(64);
    let configs = Arc::new(ConfigService::new(store_dep.clone(), None));
    let backup_service = Arc::new(BackupService::new(
        store_dep.clone(),
        Dependency::Ready(archive),
        configs,
        event_bus.clone(),
        BackupSettings {
            config_file: None,
            uploads_dir: PathBuf::from("/nonexistent/uploads"),
            source_tag: "api-test".into(),
            compress: false,
            partial_read_policy: PartialReadPolicy::Abort,
        },
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
        },
    ));
    let email_queue = Arc::new(EmailQueueService::new(store_dep));
    let app = api::app(AppState {
        backup_service,
        email_queue,
        event_bus,
    });
    Harness {
        _dir: dir,
        store,
        app,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    };
    let Ok(request) = request else {
        panic!("request should build");
    };
    let Ok(response) = app.clone().oneshot(request).await else {
        panic!("router is infallible");
    };
    let status = response.status();
    let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
        panic!("body should be readable");
    };
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_configured_collaborators() {
    let h = harness();
    let (status, body) = send(&h.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
    assert!(body["archive"].as_str().is_some_and(|a| a.starts_with("local:")));
    assert_eq!(body["audit"], false);
}

#[tokio::test]
async fn scheduled_run_is_declined_while_disabled() {
    let h = harness();
    let (status, body) = send(&h.app, "GET", "/api/backup/cron", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "automatic backup is disabled");
}

#[tokio::test]
async fn toggle_enables_the_scheduled_run() {
    let h = harness();
    h.store
        .set_rows("users", vec![row(json!({"id": "u1", "email": "a@grbt8.store"}))])
        .await;

    let (status, body) = send(&h.app, "POST", "/api/backup", Some(json!({"action": "toggle"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], true);

    let (status, body) = send(&h.app, "GET", "/api/backup/cron", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["database"]["status"], "success");
}

#[tokio::test]
async fn bad_actions_are_rejected() {
    let h = harness();
    let (status, body) = send(&h.app, "POST", "/api/backup", Some(json!({"action": "explode"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1002);
    assert_eq!(body["success"], false);

    let (status, body) = send(&h.app, "POST", "/api/backup", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1001);

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/backup",
        Some(json!({"action": "configure", "config": {"retention": 0}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1003);
}

#[tokio::test]
async fn configure_saves_and_status_reports_it() {
    let h = harness();
    let config = json!({
        "enabled": true,
        "schedule": "30 3 * * *",
        "retention": 14,
        "includeDatabase": true,
        "includeUploads": false,
        "includeLogs": false,
    });
    let (status, body) = send(
        &h.app,
        "POST",
        "/api/backup",
        Some(json!({"action": "configure", "config": config})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["retention"], 14);

    let (status, body) = send(&h.app, "GET", "/api/backup/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["config"]["schedule"], "30 3 * * *");
    assert_eq!(body["data"]["archiveCount"], 0);
    assert!(body["data"]["nextBackup"].is_string());
}

#[tokio::test]
async fn create_then_restore_round_trips() {
    let h = harness();
    h.store
        .set_rows(
            "users",
            vec![
                row(json!({"id": "u1", "email": "a@grbt8.store"})),
                row(json!({"id": "u2", "email": "b@grbt8.store"})),
            ],
        )
        .await;

    let (status, body) = send(&h.app, "POST", "/api/backup", Some(json!({"action": "create"}))).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = send(&h.app, "GET", "/api/backup/archives", None).await;
    assert_eq!(status, StatusCode::OK);
    let Some(path) = body["data"][0]["path"].as_str().map(str::to_owned) else {
        panic!("archive listing should contain the snapshot: {body}");
    };

    h.store
        .set_rows("users", vec![row(json!({"id": "u3", "email": "c@grbt8.store"}))])
        .await;
    let (status, body) = send(
        &h.app,
        "POST",
        "/api/restore",
        Some(json!({"path": path, "strategy": "replace", "tables": ["users"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], 1001);
    assert_eq!(h.store.rows("users").await.len(), 1);

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/restore",
        Some(json!({"path": path, "strategy": "replace"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["totalRows"], 2);

    let users = h.store.rows("users").await;
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|user| user.get("id") != Some(&json!("u3"))));
}

#[tokio::test]
async fn restore_without_snapshots_is_not_found() {
    let h = harness();
    let (status, body) = send(&h.app, "POST", "/api/restore", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 2001);
}

#[tokio::test]
async fn restore_rejects_paths_outside_the_database_folder() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        "POST",
        "/api/restore",
        Some(json!({"path": "../etc/passwd"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1001);
}

#[tokio::test]
async fn email_queue_actions() {
    let h = harness();
    h.store
        .set_rows(
            "emailQueue",
            vec![
                row(json!({
                    "id": "e1", "recipient": "a@grbt8.store", "subject": "Ticket",
                    "status": "failed", "priority": "high", "retryCount": 1,
                    "createdAt": "2025-01-01T00:00:00Z",
                })),
                row(json!({
                    "id": "e2", "recipient": "b@grbt8.store", "subject": "Receipt",
                    "status": "pending", "priority": "normal", "retryCount": 0,
                    "createdAt": "2025-01-02T00:00:00Z",
                })),
            ],
        )
        .await;

    let (status, body) = send(&h.app, "GET", "/api/email/queue?status=failed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["queue"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"]["stats"]["total"], 2);

    let (status, _) = send(&h.app, "GET", "/api/email/queue?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&h.app, "POST", "/api/email/queue", Some(json!({"action": "retry"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1001);

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/email/queue",
        Some(json!({"action": "resend", "queueId": "e1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1002);

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/email/queue",
        Some(json!({"action": "cancel", "queueId": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 2001);

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/email/queue",
        Some(json!({"action": "retry", "queueId": "e1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "e1");
    let rows = h.store.rows("emailQueue").await;
    let Some(retried) = rows.iter().find(|r| r.get("id") == Some(&json!("e1"))) else {
        panic!("e1 should still exist");
    };
    assert_eq!(retried.get("status"), Some(&json!("pending")));
    assert_eq!(retried.get("retryCount"), Some(&json!(2)));
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let h = harness();
    let Ok(request) = Request::builder()
        .method("POST")
        .uri("/api/backup")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
    else {
        panic!("request should build");
    };
    let Ok(response) = h.app.clone().oneshot(request).await else {
        panic!("router is infallible");
    };
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
