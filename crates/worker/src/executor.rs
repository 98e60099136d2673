//! One signed HTTP POST per call, classified into an [`Outcome`].
//!
//! The executor never touches the ledger; callers decide what an outcome
//! means for the delivery row.

use chrono::{DateTime, Utc};
use hooks_core::types::{DeliveryAttempt, Outcome, Subscription};
use serde::Serialize;
use serde_json::json;
use std::time::{Duration, Instant};

use crate::request::{build_body, DeliveryRequest};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 1024;
pub const TEST_EVENT: &str = "webhook.test";

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct Executor {
    client: reqwest::Client,
    timeout: Duration,
    body_limit: usize,
}

/// What the diagnostic probe reports back to the operator.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub success: bool,
    pub status_code: Option<i32>,
    pub response_time_ms: i32,
    pub error: Option<String>,
}

impl From<Outcome> for ProbeReport {
    fn from(outcome: Outcome) -> Self {
        ProbeReport {
            success: outcome.success,
            status_code: outcome.status_code,
            response_time_ms: outcome.response_time_ms,
            error: outcome.error,
        }
    }
}

impl Executor {
    pub fn new(timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("hooks-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            timeout,
            body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
        })
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send the stored payload of `record` to the subscription endpoint.
    pub async fn attempt(&self, subscription: &Subscription, record: &DeliveryAttempt) -> Outcome {
        let request = DeliveryRequest::new(
            subscription,
            &record.event_type,
            &record.request_payload,
            record.attempt + 1,
        );
        self.send(request).await
    }

    /// Send one synthetic event right now, outside the ledger and the retry
    /// policy.
    pub async fn probe(&self, subscription: &Subscription, now: DateTime<Utc>) -> ProbeReport {
        let data = json!({
            "message": "test delivery",
            "subscriptionId": subscription.id,
        });
        let body = match build_body(TEST_EVENT, &data, now) {
            Ok(body) => body,
            Err(err) => {
                return ProbeReport {
                    success: false,
                    status_code: None,
                    response_time_ms: 0,
                    error: Some(format!("failed to build test payload: {}", err)),
                }
            }
        };

        let request = DeliveryRequest::new(subscription, TEST_EVENT, &body, 1);
        self.send(request).await.into()
    }

    async fn send(&self, request: DeliveryRequest<'_>) -> Outcome {
        let start = Instant::now();
        let call = async {
            let response = self
                .client
                .post(&request.subscription.url)
                .headers(request.headers())
                .body(request.body.to_owned())
                .send()
                .await?;
            let status = response.status();
            let body = read_body(response, self.body_limit).await;
            Ok::<_, reqwest::Error>((status, body))
        };

        let result = tokio::time::timeout(self.timeout, call).await;
        let elapsed_ms = i32::try_from(start.elapsed().as_millis()).unwrap_or(i32::MAX);

        match result {
            Err(_) => Outcome::failed(
                None,
                None,
                elapsed_ms,
                format!("request timed out after {}s", self.timeout.as_secs_f64()),
            ),
            Ok(Err(err)) => Outcome::failed(None, None, elapsed_ms, describe(&err)),
            Ok(Ok((status, body))) => {
                let code = i32::from(status.as_u16());
                if status.is_success() {
                    Outcome::delivered(code, body, elapsed_ms)
                } else {
                    Outcome::failed(Some(code), body, elapsed_ms, format!("HTTP {}", code))
                }
            }
        }
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    }
}

/// Read at most `limit` bytes of the response body.
async fn read_body(mut response: reqwest::Response, limit: usize) -> Option<String> {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(_) => break,
        }
    }
    if buf.is_empty() {
        return None;
    }
    Some(truncate_utf8(&String::from_utf8_lossy(&buf), limit))
}

/// Cut `text` to at most `limit` bytes without splitting a character.
pub fn truncate_utf8(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_utf8_short_text_unchanged() {
        assert_eq!(truncate_utf8("ok", 10), "ok");
    }

    #[test]
    fn test_truncate_utf8_cuts_at_limit() {
        assert_eq!(truncate_utf8("abcdef", 4), "abcd");
    }

    #[test]
    fn test_truncate_utf8_respects_char_boundaries() {
        // "é" is two bytes
        assert_eq!(truncate_utf8("aé", 2), "a");
        assert_eq!(truncate_utf8("ééé", 5), "éé");
    }

    #[test]
    fn test_executor_keeps_timeout() {
        let executor = Executor::new(Duration::from_millis(250)).unwrap();
        assert_eq!(executor.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_probe_report_from_outcome() {
        let report = ProbeReport::from(Outcome::failed(Some(404), None, 9, "HTTP 404"));
        assert!(!report.success);
        assert_eq!(report.status_code, Some(404));
        assert_eq!(report.error.as_deref(), Some("HTTP 404"));
    }
}
