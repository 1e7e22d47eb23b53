//! Integration tests for `src/webhook.rs`.
//!
//! Delivery is fire-and-forget with a single attempt: these tests pin the
//! success statuses (200/201/202), the false-on-anything-else behaviour,
//! the payload shape on the wire, and the delivery timeout.

use std::time::Duration;

use clientpulse::webhook::{new_recommendation_alert, WebhookNotifier};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_deliver_succeeds_on_each_accepted_status() {
    for status in [200_u16, 201, 202] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Duration::from_secs(2));
        let payload = new_recommendation_alert("Acme", "IMPLEMENT: templates");
        assert!(
            notifier
                .deliver(&format!("{}/hook", server.uri()), &payload)
                .await,
            "status {status} must count as delivered"
        );
    }
}

#[tokio::test]
async fn test_deliver_fails_on_receiver_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(Duration::from_secs(2));
    let payload = new_recommendation_alert("Acme", "rec");
    assert!(
        !notifier
            .deliver(&format!("{}/hook", server.uri()), &payload)
            .await
    );
}

#[tokio::test]
async fn test_deliver_fails_outside_the_accepted_status_set() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(Duration::from_secs(2));
    let payload = new_recommendation_alert("Acme", "rec");
    // 204 is success-ish but the contract is exactly {200, 201, 202}.
    assert!(
        !notifier
            .deliver(&format!("{}/hook", server.uri()), &payload)
            .await
    );
}

#[tokio::test]
async fn test_payload_shape_on_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(serde_json::json!({
            "event_type": "new_recommendation",
            "client": "Acme",
            "recommendation": "IMPLEMENT: templates",
            "priority": "medium",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(Duration::from_secs(2));
    let payload = new_recommendation_alert("Acme", "IMPLEMENT: templates");
    assert!(
        notifier
            .deliver(&format!("{}/hook", server.uri()), &payload)
            .await
    );
}

#[tokio::test]
async fn test_delivery_respects_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(Duration::from_millis(250));
    let payload = new_recommendation_alert("Acme", "rec");
    let start = std::time::Instant::now();
    assert!(
        !notifier
            .deliver(&format!("{}/hook", server.uri()), &payload)
            .await
    );
    assert!(start.elapsed() < Duration::from_secs(3));
}
