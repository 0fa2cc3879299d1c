#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use hookwatch_core::{CanonicalEvent, DestinationDescriptor, EventKind};
use hookwatch_dispatch::{DeliveryError, Dispatcher, DispatcherConfig};
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn event(kind: EventKind) -> CanonicalEvent {
    let mut annotations = BTreeMap::new();
    annotations.insert("tier".to_string(), "gold".to_string());
    CanonicalEvent { namespace: "team-a".into(), name: "proj1".into(), annotations, kind }
}

fn dispatcher(dests: Vec<DestinationDescriptor>, timeout: Duration) -> Dispatcher {
    Dispatcher::new(DispatcherConfig { destinations: dests, timeout }).expect("dispatcher")
}

/// A local URL nothing listens on.
fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}/hook", port)
}

#[tokio::test]
async fn fans_out_one_post_per_destination() {
    let mut servers = Vec::new();
    for _ in 0..3 {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "namespace": "team-a",
                "name": "proj1",
                "annotations": { "tier": "gold" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        servers.push(server);
    }
    let dests = servers.iter().map(|s| DestinationDescriptor::new(format!("{}/hook", s.uri()))).collect();
    let d = dispatcher(dests, Duration::from_secs(5));
    let reports = d.dispatch(&event(EventKind::Created)).await;
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.is_success() && r.method == "POST"));
}

#[tokio::test]
async fn attaches_bearer_token_only_when_configured() {
    let authed = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&authed)
        .await;
    let plain = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(1).mount(&plain).await;

    let d = dispatcher(
        vec![DestinationDescriptor::new(authed.uri()).with_token("s3cret"), DestinationDescriptor::new(plain.uri())],
        Duration::from_secs(5),
    );
    let reports = d.dispatch(&event(EventKind::Updated)).await;
    assert!(reports.iter().all(|r| r.is_success()));

    let received = plain.received_requests().await.expect("recording enabled");
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn failing_destination_does_not_affect_others() {
    let bad = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(500)).expect(1).mount(&bad).await;
    let good = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(1).mount(&good).await;

    let d = dispatcher(vec![DestinationDescriptor::new(bad.uri()), DestinationDescriptor::new(good.uri())], Duration::from_secs(5));
    let reports = d.dispatch(&event(EventKind::Created)).await;
    assert!(matches!(reports[0].outcome, Err(DeliveryError::Status(500))));
    assert!(reports[1].is_success());
}

#[tokio::test]
async fn only_200_counts_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(201)).expect(1).mount(&server).await;
    let d = dispatcher(vec![DestinationDescriptor::new(server.uri())], Duration::from_secs(5));
    let reports = d.dispatch(&event(EventKind::Created)).await;
    assert!(matches!(reports[0].outcome, Err(DeliveryError::Status(201))));
}

#[tokio::test]
async fn deletions_use_delete_method_and_route() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/projects/team-a/proj1"))
        .and(body_json(serde_json::json!({ "namespace": "team-a", "name": "proj1" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let dest = DestinationDescriptor::new(format!("{}/projects", server.uri()))
        .with_delete_url(format!("{}/projects/{{namespace}}/{{name}}", server.uri()));
    let d = dispatcher(vec![dest], Duration::from_secs(5));
    let mut ev = event(EventKind::Deleted);
    ev.annotations.clear();
    let reports = d.dispatch(&ev).await;
    assert_eq!(reports[0].method, "DELETE");
    assert!(reports[0].is_success(), "{:?}", reports[0].outcome);
}

#[tokio::test]
async fn slow_destinations_run_concurrently() {
    let delay = Duration::from_millis(400);
    let mut dests = Vec::new();
    let mut servers = Vec::new();
    for _ in 0..3 {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(delay))
            .expect(1)
            .mount(&server)
            .await;
        dests.push(DestinationDescriptor::new(server.uri()));
        servers.push(server);
    }
    let d = dispatcher(dests, Duration::from_secs(5));
    let started = Instant::now();
    let reports = d.dispatch(&event(EventKind::Created)).await;
    let elapsed = started.elapsed();
    assert!(reports.iter().all(|r| r.is_success()));
    assert!(elapsed < delay * 2, "dispatch took {:?}; destinations were not concurrent", elapsed);
}

#[tokio::test]
async fn timeout_is_reported_as_failure() {
    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&slow)
        .await;
    let d = dispatcher(vec![DestinationDescriptor::new(slow.uri())], Duration::from_millis(200));
    let started = Instant::now();
    let reports = d.dispatch(&event(EventKind::Created)).await;
    assert!(matches!(reports[0].outcome, Err(DeliveryError::Timeout)), "{:?}", reports[0].outcome);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn unreachable_destination_fails_once_and_healthy_one_receives_one_call() {
    let healthy = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(1).mount(&healthy).await;
    let d = dispatcher(
        vec![DestinationDescriptor::new(unreachable_url()), DestinationDescriptor::new(healthy.uri())],
        Duration::from_secs(5),
    );
    let reports = d.dispatch(&event(EventKind::Created)).await;
    assert_eq!(reports.len(), 2);
    assert!(matches!(reports[0].outcome, Err(DeliveryError::Transport(_))), "{:?}", reports[0].outcome);
    assert!(reports[1].is_success());
    assert_eq!(healthy.received_requests().await.expect("recording").len(), 1);
}
