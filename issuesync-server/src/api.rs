//! API routes.
//!
//! Webhook endpoints answer `"ack"` as soon as the event is enqueued;
//! the remote work happens asynchronously on the group's dispatcher.
//! The `/sync/*` management routes drive manual re-syncs.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::debug;

use issuesync_core::{QueryMode, SyncError};
use issuesync_types::hook::{ActionEvent, WebhookEvent};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // Webhooks
        .route("/webhooks/:group", post(upstream_webhook))
        .route("/webhooks/mirror/:group", post(downstream_webhook))
        // Manual re-sync
        .route("/sync/issues/re-sync/:group/:issue", post(resync_issue))
        .route("/sync/issues/query/full/:group", post(sync_query_full))
        .route("/sync/issues/transition/re-sync/:group", post(sync_query_transitions))
        .route("/sync/fix-versions/:group/:project", post(refresh_fix_versions))
        // Status
        .route("/status", get(get_status))
}

fn error_response(error: SyncError) -> (StatusCode, String) {
    let status = match &error {
        SyncError::UnknownProjectGroup(_)
        | SyncError::UnknownProject(_)
        | SyncError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string())
}

// ============ Webhooks ============

#[derive(Deserialize)]
struct WebhookQuery {
    #[serde(rename = "triggeredByUser")]
    triggered_by_user: Option<String>,
}

async fn upstream_webhook(
    State(state): State<AppState>,
    Path(group): Path<String>,
    Query(query): Query<WebhookQuery>,
    Json(event): Json<WebhookEvent>,
) -> Result<&'static str, (StatusCode, String)> {
    debug!(group, event = ?event.webhook_event, "upstream notification");
    state
        .service
        .acknowledge(&group, event, query.triggered_by_user.as_deref())
        .await
        .map_err(error_response)?;
    Ok("ack")
}

async fn downstream_webhook(
    State(state): State<AppState>,
    Path(group): Path<String>,
    Json(event): Json<ActionEvent>,
) -> Result<&'static str, (StatusCode, String)> {
    debug!(group, event = ?event.event, "downstream notification");
    state
        .service
        .downstream_acknowledge(&group, event)
        .await
        .map_err(error_response)?;
    Ok("ack")
}

// ============ Manual re-sync ============

async fn resync_issue(
    State(state): State<AppState>,
    Path((group, issue)): Path<(String, String)>,
) -> Result<&'static str, (StatusCode, String)> {
    state.service.resync_issue(&group, &issue).await.map_err(error_response)?;
    Ok("ack")
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
}

async fn sync_query_full(
    State(state): State<AppState>,
    Path(group): Path<String>,
    Json(payload): Json<QueryRequest>,
) -> Result<&'static str, (StatusCode, String)> {
    state
        .service
        .sync_by_query(&group, &payload.query, QueryMode::Full)
        .await
        .map_err(error_response)?;
    Ok("ack")
}

async fn sync_query_transitions(
    State(state): State<AppState>,
    Path(group): Path<String>,
    Json(payload): Json<QueryRequest>,
) -> Result<&'static str, (StatusCode, String)> {
    state
        .service
        .sync_by_query(&group, &payload.query, QueryMode::TransitionOnly)
        .await
        .map_err(error_response)?;
    Ok("ack")
}

async fn refresh_fix_versions(
    State(state): State<AppState>,
    Path((group, project)): Path<(String, String)>,
) -> Result<&'static str, (StatusCode, String)> {
    state.service.refresh_fix_versions(&group, &project).await.map_err(error_response)?;
    Ok("ack")
}

// ============ Status ============

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    groups: Vec<String>,
    pending_events: usize,
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut groups: Vec<String> = state.service.group_names().map(str::to_string).collect();
    groups.sort();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        groups,
        pending_events: state.service.pending_events(),
    })
}
