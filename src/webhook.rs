//! Outbound webhook delivery.
//!
//! Fire-and-forget, best-effort, single attempt: one POST per event with a
//! short fixed timeout and no retry, queue, or delivery guarantee. A
//! delivery is successful iff the receiver answers 200, 201, or 202.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::metrics;

/// Default delivery timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers JSON event payloads to client-registered URLs.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl WebhookNotifier {
    /// Create a notifier with the given per-delivery timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// POST `payload` to `url` once.
    ///
    /// Returns `true` iff the receiver answered 200, 201, or 202.
    /// Transport errors, timeouts, and other statuses are logged and
    /// reported as `false`; this function never fails.
    pub async fn deliver(&self, url: &str, payload: &Value) -> bool {
        let result = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await;

        match result {
            Ok(response) if matches!(response.status().as_u16(), 200 | 201 | 202) => {
                info!(target: "clientpulse::webhook", url, "webhook delivered");
                metrics::inc_webhook("delivered");
                true
            }
            Ok(response) => {
                warn!(
                    target: "clientpulse::webhook",
                    url,
                    status = response.status().as_u16(),
                    "webhook rejected by receiver"
                );
                metrics::inc_webhook("rejected");
                false
            }
            Err(e) => {
                warn!(target: "clientpulse::webhook", url, error = %e, "webhook delivery failed");
                metrics::inc_webhook("failed");
                false
            }
        }
    }
}

/// Payload for a `new_recommendation` event.
pub fn new_recommendation_alert(client_name: &str, recommendation: &str) -> Value {
    json!({
        "event_type": "new_recommendation",
        "title": "New AI Recommendation",
        "message": format!("New optimization available: {recommendation}"),
        "client": client_name,
        "recommendation": recommendation,
        "priority": "medium",
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_recommendation_alert_shape() {
        let payload = new_recommendation_alert("Acme", "IMPLEMENT: ship templates");
        assert_eq!(payload["event_type"], "new_recommendation");
        assert_eq!(payload["client"], "Acme");
        assert_eq!(payload["recommendation"], "IMPLEMENT: ship templates");
        assert_eq!(payload["priority"], "medium");
        assert!(payload["message"]
            .as_str()
            .unwrap()
            .contains("IMPLEMENT: ship templates"));
        assert!(payload["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_deliver_to_unreachable_host_is_false() {
        let notifier = WebhookNotifier::new(Duration::from_millis(300));
        let payload = new_recommendation_alert("Acme", "rec");
        // Reserved TEST-NET-1 address; nothing listens there.
        assert!(!notifier.deliver("http://192.0.2.1:9/hook", &payload).await);
    }
}
