//! Ingress filtering: what gets enqueued and what is dropped.

use std::sync::Arc;

use serde_json::json;
use wiremock::MockServer;

use issuesync_core::reporting::LogCollector;
use issuesync_core::{SyncError, SyncService, SYSTEM_ACTOR};
use issuesync_types::config::SyncConfig;
use issuesync_types::hook::{ActionEvent, WebhookEvent};

fn config(source: &MockServer, destination: &MockServer) -> SyncConfig {
    serde_json::from_value(json!({
        "project_group": {
            "primary": {
                "source": {
                    "api_uri": source.uri(),
                    "api_user": { "email": "bot@example.com", "token": "t" }
                },
                "destination": {
                    "api_uri": destination.uri(),
                    "api_user": { "email": "bot@example.com", "token": "t" }
                },
                "users": {
                    "mapping": {},
                    "ignored_upstream_users": ["upstream-bot"],
                    "ignored_downstream_users": ["downstream-bot"]
                },
                "issue_types": { "default_value": "10001" },
                "projects": {
                    "WIDGET": {
                        "project_id": "12345",
                        "project_key": "WIDGET",
                        "original_project_key": "UPWIDGET"
                    }
                }
            }
        }
    }))
    .unwrap()
}

async fn service(source: &MockServer, destination: &MockServer) -> SyncService {
    SyncService::new(&config(source, destination), Arc::new(LogCollector)).unwrap()
}

#[tokio::test]
async fn unknown_group_is_rejected_synchronously() {
    let source = MockServer::start().await;
    let destination = MockServer::start().await;
    let service = service(&source, &destination).await;

    let event = WebhookEvent::issue_updated(101, "UPWIDGET-1");
    let error = service.acknowledge("nope", event, None).await.unwrap_err();
    assert!(matches!(error, SyncError::UnknownProjectGroup(name) if name == "nope"));
    assert_eq!(service.pending_events(), 0);
    service.shutdown().await;
}

#[tokio::test]
async fn ignored_actors_are_dropped_before_the_queue() {
    let source = MockServer::start().await;
    let destination = MockServer::start().await;
    let service = service(&source, &destination).await;

    let event = WebhookEvent::issue_updated(101, "UPWIDGET-1");
    service.acknowledge("primary", event.clone(), Some("upstream-bot")).await.unwrap();
    service.acknowledge("primary", event, Some(SYSTEM_ACTOR)).await.unwrap();

    let mirror = ActionEvent {
        event: Some("jira:issue_update_assignee".to_string()),
        key: Some("WIDGET-1".to_string()),
        triggered_by_user: Some("downstream-bot".to_string()),
        ..ActionEvent::default()
    };
    service.downstream_acknowledge("primary", mirror).await.unwrap();

    assert_eq!(service.pending_events(), 0);
    service.shutdown().await;
    assert!(source.received_requests().await.unwrap().is_empty());
    assert!(destination.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_kinds_are_acknowledged_without_work() {
    let source = MockServer::start().await;
    let destination = MockServer::start().await;
    let service = service(&source, &destination).await;

    let event = WebhookEvent {
        webhook_event: Some("jira:worklog_updated".to_string()),
        ..WebhookEvent::default()
    };
    service.acknowledge("primary", event, Some("anyone")).await.unwrap();
    assert_eq!(service.pending_events(), 0);
    service.shutdown().await;
}

#[tokio::test]
async fn events_without_identifiers_are_malformed() {
    let source = MockServer::start().await;
    let destination = MockServer::start().await;
    let service = service(&source, &destination).await;

    let event = WebhookEvent {
        webhook_event: Some("comment_created".to_string()),
        ..WebhookEvent::default()
    };
    let error = service.acknowledge("primary", event, None).await.unwrap_err();
    assert!(matches!(error, SyncError::MalformedEvent(_)));
    assert_eq!(service.pending_events(), 0);
    service.shutdown().await;
}
