mod common;

use common::{policy, subscription, Harness, SECRET};
use hooks_core::signer;
use hooks_worker::executor::TEST_EVENT;
use hooks_worker::request::{EVENT_HEADER, SIGNATURE_HEADER};
use serde_json::Value;
use std::time::Duration;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_probe_reports_success_without_ledger_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header(EVENT_HEADER, TEST_EVENT))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::new();
    let sub = subscription("sub_probe", server.uri(), policy(true, 3, 60));

    let report = h.executor.probe(&sub, h.clock_now()).await;

    assert!(report.success);
    assert_eq!(report.status_code, Some(200));
    assert_eq!(report.error, None);
    assert_eq!(h.store.ledger_writes(), 0);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let signature = request.headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
    assert!(signer::verify(&request.body, signature, SECRET));

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["event"], TEST_EVENT);
    assert_eq!(body["data"]["subscriptionId"], "sub_probe");
}

#[tokio::test]
async fn test_probe_reports_http_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let h = Harness::new();
    let sub = subscription("sub_probe", server.uri(), policy(true, 3, 60));

    let report = h.executor.probe(&sub, h.clock_now()).await;

    assert!(!report.success);
    assert_eq!(report.status_code, Some(401));
    assert_eq!(report.error.as_deref(), Some("HTTP 401"));
}

#[tokio::test]
async fn test_probe_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let h = Harness::with_timeout(Duration::from_millis(200));
    let sub = subscription("sub_probe", server.uri(), policy(true, 3, 60));

    let report = h.executor.probe(&sub, h.clock_now()).await;

    assert!(!report.success);
    assert_eq!(report.status_code, None);
    assert!(report.error.unwrap().contains("timed out"));
}
