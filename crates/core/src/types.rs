use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
pub const DEFAULT_BASE_DELAY_SECONDS: i32 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// `success` and `failed` never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Success | DeliveryStatus::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown delivery status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for DeliveryStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DeliveryStatus::Pending),
            "retrying" => Ok(DeliveryStatus::Retrying),
            "success" => Ok(DeliveryStatus::Success),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: i32,
    pub base_delay_seconds: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_seconds: DEFAULT_BASE_DELAY_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub event_filter: Vec<String>,
    pub active: bool,
    pub retry_policy: RetryPolicy,
    pub custom_headers: BTreeMap<String, String>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, event_type: &str) -> bool {
        self.event_filter.iter().any(|e| e == event_type)
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub id: String,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub event_filter: Vec<String>,
    pub retry_policy: RetryPolicy,
    pub custom_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionChanges {
    pub name: Option<String>,
    pub url: Option<String>,
    pub event_filter: Option<Vec<String>>,
    pub active: Option<bool>,
    pub retry_policy: Option<RetryPolicy>,
    pub custom_headers: Option<BTreeMap<String, String>>,
}

impl SubscriptionChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.event_filter.is_none()
            && self.active.is_none()
            && self.retry_policy.is_none()
            && self.custom_headers.is_none()
    }
}

/// The durable delivery task for one event and one subscription. It is
/// created once and advanced in place across retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub id: String,
    pub subscription_id: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub request_payload: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub status: DeliveryStatus,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub response_time_ms: Option<i32>,
    pub error_message: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub id: String,
    pub subscription_id: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub request_payload: String,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub retrying: i64,
    pub pending: i64,
    pub success_rate: f64,
    pub avg_response_time_ms: Option<f64>,
    pub last_delivery_at: Option<DateTime<Utc>>,
}

/// A published domain event as handed over by the business layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub data: serde_json::Value,
}

/// Wire body of every callback: `{"event", "timestamp", "data"}`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<'a> {
    pub event: &'a str,
    pub timestamp: DateTime<Utc>,
    pub data: &'a serde_json::Value,
}

impl Envelope<'_> {
    pub fn to_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Result of one HTTP attempt against a subscriber endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub success: bool,
    pub status_code: Option<i32>,
    pub response_body: Option<String>,
    pub response_time_ms: i32,
    pub error: Option<String>,
}

impl Outcome {
    pub fn delivered(status_code: i32, response_body: Option<String>, response_time_ms: i32) -> Self {
        Self {
            success: true,
            status_code: Some(status_code),
            response_body,
            response_time_ms,
            error: None,
        }
    }

    pub fn failed(
        status_code: Option<i32>,
        response_body: Option<String>,
        response_time_ms: i32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            status_code,
            response_body,
            response_time_ms,
            error: Some(error.into()),
        }
    }

    pub fn detail(&self) -> String {
        match (&self.error, self.status_code) {
            (Some(error), _) => error.clone(),
            (None, Some(code)) => format!("HTTP {}", code),
            (None, None) => "delivery failed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Retrying,
            DeliveryStatus::Success,
            DeliveryStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DeliveryStatus>(), Ok(status));
        }
        assert!("delivered".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(DeliveryStatus::Success.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let data = json!({"id": 42});
        let timestamp = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let body = Envelope {
            event: "ncr.created",
            timestamp,
            data: &data,
        }
        .to_body()
        .unwrap();

        assert_eq!(
            body,
            r#"{"event":"ncr.created","timestamp":"2026-03-01T12:00:00Z","data":{"id":42}}"#
        );
    }

    #[test]
    fn test_outcome_detail() {
        assert_eq!(Outcome::failed(Some(500), None, 3, "HTTP 500").detail(), "HTTP 500");
        assert_eq!(
            Outcome::failed(None, None, 3, "connection refused").detail(),
            "connection refused"
        );
        assert_eq!(Outcome::delivered(200, None, 3).error, None);
    }

    #[test]
    fn test_subscription_matches_filter() {
        let now = Utc::now();
        let subscription = Subscription {
            id: "sub_1".to_string(),
            name: "quality".to_string(),
            url: "https://ok.example/hook".to_string(),
            secret: "whsec_x".to_string(),
            event_filter: vec!["ncr.created".to_string(), "ncr.closed".to_string()],
            active: true,
            retry_policy: RetryPolicy::default(),
            custom_headers: BTreeMap::new(),
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };

        assert!(subscription.matches("ncr.created"));
        assert!(!subscription.matches("ncr"));
        assert!(!subscription.matches("inspection.created"));
    }
}
