//! Field mapping cache behavior against simulated instances.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use issuesync_client::TrackerClient;
use issuesync_core::mapping::FieldMappingCache;
use issuesync_types::config::{ApiUser, Instance, LoginKind, ProjectGroup};

fn client(server: &MockServer) -> TrackerClient {
    let instance = Instance {
        api_uri: server.uri(),
        login_kind: LoginKind::Basic,
        api_user: ApiUser { email: "bot@example.com".to_string(), token: "t".to_string() },
        log_requests: false,
    };
    TrackerClient::new(&instance).unwrap().with_retry_delay(Duration::from_millis(10))
}

fn group(source: &MockServer, destination: &MockServer) -> ProjectGroup {
    serde_json::from_value(json!({
        "source": {
            "api_uri": source.uri(),
            "api_user": { "email": "bot@example.com", "token": "t" }
        },
        "destination": {
            "api_uri": destination.uri(),
            "api_user": { "email": "bot@example.com", "token": "t" }
        },
        "users": { "mapping": { "alice-up": "alice-down" } },
        "issue_types": { "default_value": "10001" },
        "projects": {}
    }))
    .unwrap()
}

#[tokio::test]
async fn enumeration_happens_once_per_kind() {
    let source = MockServer::start().await;
    let destination = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/priority"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "1", "name": "Blocker" },
            { "id": "2", "name": "Major" }
        ])))
        .expect(1)
        .mount(&source)
        .await;
    Mock::given(method("GET"))
        .and(path("/priority"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "10", "name": "blocker" },
            { "id": "20", "name": "Major" }
        ])))
        .expect(1)
        .mount(&destination)
        .await;

    let group = group(&source, &destination);
    let source_client = client(&source);
    let destination_client = client(&destination);
    let cache = FieldMappingCache::new(&group);

    let mapped = cache.priority(&group, &source_client, &destination_client, "1").await.unwrap();
    assert_eq!(mapped.as_deref(), Some("10"));
    // memoized, the expect(1) above guards against a second enumeration
    let mapped = cache.priority(&group, &source_client, &destination_client, "2").await.unwrap();
    assert_eq!(mapped.as_deref(), Some("20"));
}

#[tokio::test]
async fn static_mapping_wins_without_remote_calls() {
    let source = MockServer::start().await;
    let destination = MockServer::start().await;

    let mut group = group(&source, &destination);
    group.statuses.mapping.insert("open".to_string(), "31".to_string());
    let source_client = client(&source);
    let destination_client = client(&destination);
    let cache = FieldMappingCache::new(&group);

    let mapped = cache
        .status_to_transition(&group, &source_client, &destination_client, "open")
        .await
        .unwrap();
    assert_eq!(mapped.as_deref(), Some("31"));
    assert!(source.received_requests().await.unwrap().is_empty());
    assert!(destination.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn enumerated_statuses_resolve_by_name() {
    let source = MockServer::start().await;
    let destination = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "1", "name": "Open" },
            { "id": "6", "name": "Closed" }
        ])))
        .expect(1)
        .mount(&source)
        .await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "10001", "name": "open" },
            { "id": "10006", "name": "Done" }
        ])))
        .expect(1)
        .mount(&destination)
        .await;

    let group = group(&source, &destination);
    let source_client = client(&source);
    let destination_client = client(&destination);
    let cache = FieldMappingCache::new(&group);

    // keyed by lowercased source status name, resolving to the
    // destination's own spelling so transitions can match on it
    let mapped = cache
        .status_to_transition(&group, &source_client, &destination_client, "open")
        .await
        .unwrap();
    assert_eq!(mapped.as_deref(), Some("open"));
    let unmatched = cache
        .status_to_transition(&group, &source_client, &destination_client, "closed")
        .await
        .unwrap();
    assert_eq!(unmatched, None);
}

#[tokio::test]
async fn unmatched_value_falls_back_to_the_default() {
    let source = MockServer::start().await;
    let destination = MockServer::start().await;
    for server in [&source, &destination] {
        Mock::given(method("GET"))
            .and(path("/issuetype"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(server)
            .await;
    }

    let group = group(&source, &destination);
    let source_client = client(&source);
    let destination_client = client(&destination);
    let cache = FieldMappingCache::new(&group);

    let mapped = cache
        .issue_type(&group, &source_client, &destination_client, "7")
        .await
        .unwrap();
    assert_eq!(mapped.as_deref(), Some("10001"));
}

#[tokio::test]
async fn user_lookups_never_enumerate() {
    let source = MockServer::start().await;
    let destination = MockServer::start().await;
    let group = group(&source, &destination);
    let cache = FieldMappingCache::new(&group);

    assert_eq!(cache.user("alice-up"), Some("alice-down"));
    assert_eq!(cache.upstream_user("alice-down"), Some("alice-up"));
    assert_eq!(cache.user("nobody"), None);
    assert!(source.received_requests().await.unwrap().is_empty());
    assert!(destination.received_requests().await.unwrap().is_empty());
}
