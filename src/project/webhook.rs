//! HTTP listener for tracker webhooks.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::EventError;
use crate::project::events::RawWebhookEvent;
use crate::project::manager::ProjectSyncManager;

/// Routes: `POST /webhook` for events, `GET /health` for liveness.
pub fn router(manager: ProjectSyncManager) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Serve `router` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    manager: ProjectSyncManager,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(manager))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_webhook(
    State(manager): State<ProjectSyncManager>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let raw: RawWebhookEvent = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid payload: {}", e) })),
            );
        }
    };

    let event_type = raw.event_type.clone();
    match manager.ingest_raw(raw).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "processed" }))),
        Err(EventError::UnsupportedType(_)) => {
            tracing::debug!(event = %event_type, "Ignoring unsupported webhook event");
            (StatusCode::OK, Json(json!({ "status": "ignored" })))
        }
        Err(e) => {
            tracing::warn!(event = %event_type, error = %e, "Rejected webhook event");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
        }
    }
}
