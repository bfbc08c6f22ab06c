//! `HttpProjectClient` against a fake tracker served by axum.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};

use agentsync::error::ProjectError;
use agentsync::project::{HttpProjectClient, ProjectClient, TrackerPriority, TrackerStatus};

#[derive(Debug, Clone, PartialEq)]
struct Recorded {
    method: &'static str,
    path: String,
    auth: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct FakeTracker {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeTracker {
    fn record(&self, method: &'static str, path: String, headers: &HeaderMap, body: Value) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().unwrap().push(Recorded {
            method,
            path,
            auth,
            body,
        });
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn list_tasks(
    State(tracker): State<FakeTracker>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let status = query.get("status").cloned().unwrap_or_default();
    tracker.record("GET", format!("/api/v1/tasks?status={}", status), &headers, Value::Null);
    Json(json!([
        {"id": "T-1", "title": "Fix login", "status": status, "priority": "critical", "labels": null},
        {"id": "T-2", "title": "Write docs", "status": status, "assignee": "agent-7"}
    ]))
}

async fn get_task(
    State(tracker): State<FakeTracker>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    tracker.record("GET", format!("/api/v1/tasks/{}", id), &headers, Value::Null);
    match id.as_str() {
        "missing" => Err(StatusCode::NOT_FOUND),
        "broken" => Err(StatusCode::SERVICE_UNAVAILABLE),
        _ => Ok(Json(json!({"id": id, "title": "Detail", "description": "Full text"}))),
    }
}

async fn patch_task(
    State(tracker): State<FakeTracker>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    tracker.record("PATCH", format!("/api/v1/tasks/{}", id), &headers, body);
    StatusCode::NO_CONTENT
}

async fn create_assignment(
    State(tracker): State<FakeTracker>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    tracker.record("POST", "/api/v1/task-assignments".to_string(), &headers, body);
    StatusCode::CREATED
}

async fn register_webhook(
    State(tracker): State<FakeTracker>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    tracker.record("POST", "/api/v1/webhooks".to_string(), &headers, body);
    StatusCode::CREATED
}

async fn spawn_tracker() -> (SocketAddr, FakeTracker) {
    let tracker = FakeTracker::default();
    let app = Router::new()
        .route("/api/v1/tasks", get(list_tasks))
        .route("/api/v1/tasks/{id}", get(get_task).patch(patch_task))
        .route("/api/v1/task-assignments", post(create_assignment))
        .route("/api/v1/webhooks", post(register_webhook))
        .with_state(tracker.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, tracker)
}

fn client_for(addr: SocketAddr) -> HttpProjectClient {
    HttpProjectClient::new(
        &format!("http://{}/", addr),
        SecretString::from("secret-token".to_string()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_list_tasks_sends_filter_and_auth() {
    let (addr, tracker) = spawn_tracker().await;
    let client = client_for(addr);

    let tasks = client.list_tasks(TrackerStatus::Todo).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, "T-1");
    assert_eq!(tasks[0].status, TrackerStatus::Todo);
    assert_eq!(tasks[0].priority, TrackerPriority::Critical);
    assert!(tasks[0].labels.is_empty());
    assert_eq!(tasks[1].assignee(), Some("agent-7"));

    let requests = tracker.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/api/v1/tasks?status=todo");
    assert_eq!(requests[0].auth.as_deref(), Some("Bearer secret-token"));
}

#[tokio::test]
async fn test_get_task_and_error_statuses() {
    let (addr, _tracker) = spawn_tracker().await;
    let client = client_for(addr);

    let task = client.get_task("T-9").await.unwrap();
    assert_eq!(task.id, "T-9");
    assert_eq!(task.description, "Full text");

    let err = client.get_task("missing").await.unwrap_err();
    assert!(matches!(err, ProjectError::Status { status: 404, .. }));
    assert!(!err.is_transient());

    let err = client.get_task("broken").await.unwrap_err();
    assert!(matches!(err, ProjectError::Status { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_write_operations() {
    let (addr, tracker) = spawn_tracker().await;
    let client = client_for(addr);

    client
        .update_task_status("T-1", TrackerStatus::InProgress)
        .await
        .unwrap();
    client.create_assignment("T-1", "agent-3").await.unwrap();
    client
        .register_webhook("https://hooks.example.com/webhook")
        .await
        .unwrap();

    let requests = tracker.requests();
    assert_eq!(requests.len(), 3);

    assert_eq!(requests[0].method, "PATCH");
    assert_eq!(requests[0].path, "/api/v1/tasks/T-1");
    assert_eq!(requests[0].body, json!({"status": "in_progress"}));

    assert_eq!(requests[1].path, "/api/v1/task-assignments");
    assert_eq!(requests[1].body["task_id"], "T-1");
    assert_eq!(requests[1].body["agent_id"], "agent-3");
    assert_eq!(requests[1].body["status"], "assigned");

    assert_eq!(requests[2].path, "/api/v1/webhooks");
    assert_eq!(
        requests[2].body,
        json!({
            "url": "https://hooks.example.com/webhook",
            "events": "task.created,task.updated,task.assigned"
        })
    );
    assert!(
        requests
            .iter()
            .all(|r| r.auth.as_deref() == Some("Bearer secret-token"))
    );
}

#[tokio::test]
async fn test_unreachable_tracker_is_transient() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client_for(addr)
        .list_tasks(TrackerStatus::Todo)
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectError::Request { .. }));
    assert!(err.is_transient());
}
