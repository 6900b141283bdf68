//! Key reservation against a simulated destination.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use issuesync_client::TrackerClient;
use issuesync_core::keys::KeyAllocator;
use issuesync_types::config::{ApiUser, Instance, LoginKind, Project};

fn client(server: &MockServer) -> TrackerClient {
    let instance = Instance {
        api_uri: server.uri(),
        login_kind: LoginKind::Basic,
        api_user: ApiUser { email: "bot@example.com".to_string(), token: "t".to_string() },
        log_requests: false,
    };
    TrackerClient::new(&instance).unwrap().with_retry_delay(Duration::from_millis(10))
}

fn project() -> Project {
    Project {
        project_id: "12345".to_string(),
        project_key: "WIDGET".to_string(),
        original_project_key: "UPWIDGET".to_string(),
    }
}

/// Hands out consecutive keys the way the real bulk endpoint does.
struct BulkResponder {
    next_key: AtomicI64,
    batch: i64,
}

impl Respond for BulkResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let start = self.next_key.fetch_add(self.batch, Ordering::SeqCst);
        let issues: Vec<_> = (start..start + self.batch)
            .map(|n| json!({ "key": format!("WIDGET-{n}") }))
            .collect();
        ResponseTemplate::new(201).set_body_json(json!({ "issues": issues, "errors": [] }))
    }
}

#[tokio::test]
async fn reservation_fills_the_gap_in_batches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issues": [{ "key": "WIDGET-3" }],
            "total": 3
        })))
        .expect(1)
        .mount(&server)
        .await;
    // highest existing key is 3; reaching 12 with batches of 5 takes two
    // bulk calls (4..=8 and 9..=13)
    Mock::given(method("POST"))
        .and(path("/issue/bulk"))
        .respond_with(BulkResponder { next_key: AtomicI64::new(4), batch: 5 })
        .expect(2)
        .mount(&server)
        .await;

    let destination = client(&server);
    let keys = KeyAllocator::new("WIDGET", &project(), Some("10001"), 5);

    keys.reserve_through(&destination, "WIDGET-12").await.unwrap();
    assert_eq!(keys.current(), Some(13));

    // already covered, no further remote calls (the mocks above would
    // overshoot their expected call counts otherwise)
    keys.reserve_through(&destination, "WIDGET-10").await.unwrap();
    assert_eq!(keys.current(), Some(13));
}

#[tokio::test]
async fn concurrent_reservations_never_overlap_batches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issues": [{ "key": "WIDGET-3" }],
            "total": 3
        })))
        .expect(1)
        .mount(&server)
        .await;
    // whichever caller wins the per-project lock seeds once and
    // allocates for both; racing callers would re-seed or allocate
    // overlapping ranges and overshoot these call counts
    Mock::given(method("POST"))
        .and(path("/issue/bulk"))
        .respond_with(BulkResponder { next_key: AtomicI64::new(4), batch: 5 })
        .expect(2)
        .mount(&server)
        .await;

    let destination = client(&server);
    let keys = KeyAllocator::new("WIDGET", &project(), Some("10001"), 5);

    let (first, second) = tokio::join!(
        keys.reserve_through(&destination, "WIDGET-12"),
        keys.reserve_through(&destination, "WIDGET-8"),
    );
    first.unwrap();
    second.unwrap();
    // 4..=8 and 9..=13 in either winner order
    assert_eq!(keys.current(), Some(13));
}

#[tokio::test]
async fn foreign_keys_are_a_no_op() {
    let server = MockServer::start().await;
    let destination = client(&server);
    let keys = KeyAllocator::new("WIDGET", &project(), Some("10001"), 5);

    keys.reserve_through(&destination, "OTHER-99").await.unwrap();
    keys.reserve_through(&destination, "WIDGET-0").await.unwrap();
    assert_eq!(keys.current(), None);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn observed_keys_short_circuit_reservation() {
    let server = MockServer::start().await;
    let destination = client(&server);
    let keys = KeyAllocator::new("WIDGET", &project(), Some("10001"), 5);

    keys.record_key("WIDGET-20");
    keys.reserve_through(&destination, "WIDGET-15").await.unwrap();
    assert!(server.received_requests().await.unwrap().is_empty());
}
