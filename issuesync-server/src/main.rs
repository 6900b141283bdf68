//! Issue replication daemon.
//!
//! Listens for tracker webhooks on /api/webhooks/*, exposes manual
//! re-sync routes under /api/sync/*, and runs the per-group cron
//! reconciliation until shut down.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use issuesync_core::SyncScheduler;
use issuesync_types::config::SyncConfig;

mod api;
mod state;

use state::AppState;

const DEFAULT_PORT: u16 = 8060;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ISSUESYNC_CONFIG").ok())
        .unwrap_or_else(|| "issuesync.json".to_string());
    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("could not read configuration from {config_path}"))?;
    let config: SyncConfig = serde_json::from_str(&raw)
        .with_context(|| format!("could not parse configuration from {config_path}"))?;

    let port: u16 = std::env::var("ISSUESYNC_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let state = AppState::new(&config)?;
    let service = Arc::clone(&state.service);
    info!(groups = config.project_group.len(), "replication service initialized");

    let mut scheduler = SyncScheduler::start(Arc::clone(&service)).await?;

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop generating new events first, then drain the queues
    scheduler.stop().await?;
    service.shutdown().await;
    info!("shut down cleanly");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api::router())
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({ "status": "ok" })))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "could not install the shutdown signal handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn test_state() -> AppState {
        let config: SyncConfig = serde_json::from_value(serde_json::json!({
            "project_group": {
                "primary": {
                    "source": {
                        "api_uri": "http://127.0.0.1:1/rest/api/2",
                        "api_user": { "email": "bot@example.com", "token": "t" }
                    },
                    "destination": {
                        "api_uri": "http://127.0.0.1:1/rest/api/2",
                        "api_user": { "email": "bot@example.com", "token": "t" }
                    },
                    "users": {},
                    "issue_types": { "default_value": "10001" },
                    "projects": {}
                }
            }
        }))
        .unwrap();
        AppState::new(&config).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_group_yields_bad_request() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::post("/api/webhooks/nope")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"webhookEvent":"jira:issue_updated","issue":{"id":1,"key":"UP-1"}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ignored_events_are_still_acknowledged() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::post("/api/webhooks/primary?triggeredByUser=whoever")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"webhookEvent":"jira:worklog_updated"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
