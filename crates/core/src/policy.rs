//! Delivery state transitions.
//!
//! The same rules run after the first attempt made by the dispatcher and
//! after every retry made by the scheduler, so both paths agree on when a
//! delivery is finished and when it is due again.

use chrono::{DateTime, Duration, Utc};

use crate::types::{DeliveryAttempt, DeliveryStatus, Outcome, Subscription};

pub const INACTIVE_MESSAGE: &str = "subscription inactive";
pub const EXHAUSTED_MESSAGE: &str = "max retries reached";

const MAX_BACKOFF_EXPONENT: i32 = 30;
const MAX_DELAY_SECONDS: i64 = i64::MAX / 1_000;

/// New values for the mutable columns of a delivery row.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub attempt: i32,
    pub status: DeliveryStatus,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub response_time_ms: Option<i32>,
    pub error_message: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Delay before the next attempt once `attempt` attempts have failed.
///
/// `attempt` is the count after the failed attempt was recorded, so the
/// first failure waits `base`, the second `2 * base`, and so on.
pub fn backoff_delay(base_delay_seconds: i32, attempt: i32) -> Duration {
    let exponent = (attempt.max(1) - 1).min(MAX_BACKOFF_EXPONENT) as u32;
    let base = i64::from(base_delay_seconds.max(1));
    Duration::seconds(base.saturating_mul(1_i64 << exponent).min(MAX_DELAY_SECONDS))
}

/// Apply an attempt outcome to a non-terminal delivery.
pub fn after_attempt(
    record: &DeliveryAttempt,
    subscription: &Subscription,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> Transition {
    let attempt = record.attempt + 1;
    let mut transition = Transition {
        attempt,
        status: DeliveryStatus::Failed,
        next_retry_at: None,
        response_status: outcome.status_code,
        response_body: outcome.response_body.clone(),
        response_time_ms: Some(outcome.response_time_ms),
        error_message: None,
        delivered_at: None,
    };

    if outcome.success {
        transition.status = DeliveryStatus::Success;
        transition.delivered_at = Some(now);
        return transition;
    }

    let detail = outcome.detail();
    let policy = &subscription.retry_policy;

    if !subscription.active {
        transition.error_message = Some(INACTIVE_MESSAGE.to_string());
    } else if attempt >= record.max_attempts {
        transition.error_message = Some(format!("{}: {}", EXHAUSTED_MESSAGE, detail));
    } else if !policy.enabled {
        transition.error_message = Some(detail);
    } else {
        transition.status = DeliveryStatus::Retrying;
        let delay = backoff_delay(policy.base_delay_seconds, attempt);
        transition.next_retry_at =
            Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
        transition.error_message = Some(detail);
    }

    transition
}

/// Terminal failure for a delivery whose subscription was deactivated or
/// deleted. No request is made, so the attempt count and the last response
/// stay as they were.
pub fn subscription_unavailable(record: &DeliveryAttempt) -> Transition {
    Transition {
        attempt: record.attempt,
        status: DeliveryStatus::Failed,
        next_retry_at: None,
        response_status: record.response_status,
        response_body: record.response_body.clone(),
        response_time_ms: record.response_time_ms,
        error_message: Some(INACTIVE_MESSAGE.to_string()),
        delivered_at: None,
    }
}
