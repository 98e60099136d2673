use chrono::{DateTime, Utc};
use hooks_core::types::{
    DeliveryAttempt, DeliveryStats, RetryPolicy, Subscription, UnknownStatus,
};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: String,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub event_filter: Vec<String>,
    pub active: bool,
    pub retry_enabled: bool,
    pub max_attempts: i32,
    pub base_delay_seconds: i32,
    pub custom_headers: Json<BTreeMap<String, String>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: row.id,
            name: row.name,
            url: row.url,
            secret: row.secret,
            event_filter: row.event_filter,
            active: row.active,
            retry_policy: RetryPolicy {
                enabled: row.retry_enabled,
                max_attempts: row.max_attempts,
                base_delay_seconds: row.base_delay_seconds,
            },
            custom_headers: row.custom_headers.0,
            last_triggered_at: row.last_triggered_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DeliveryRow {
    pub id: String,
    pub subscription_id: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub request_payload: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub status: String,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub response_time_ms: Option<i32>,
    pub error_message: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for DeliveryAttempt {
    type Error = UnknownStatus;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(DeliveryAttempt {
            status: row.status.parse()?,
            id: row.id,
            subscription_id: row.subscription_id,
            event_type: row.event_type,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            request_payload: row.request_payload,
            attempt: row.attempt,
            max_attempts: row.max_attempts,
            next_retry_at: row.next_retry_at,
            response_status: row.response_status,
            response_body: row.response_body,
            response_time_ms: row.response_time_ms,
            error_message: row.error_message,
            delivered_at: row.delivered_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct StatsRow {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub retrying: i64,
    pub pending: i64,
    pub avg_response_time_ms: Option<f64>,
    pub last_delivery_at: Option<DateTime<Utc>>,
}

impl From<StatsRow> for DeliveryStats {
    fn from(row: StatsRow) -> Self {
        let finished = row.success + row.failed;
        let success_rate = if finished == 0 {
            0.0
        } else {
            row.success as f64 / finished as f64
        };

        DeliveryStats {
            total: row.total,
            success: row.success,
            failed: row.failed,
            retrying: row.retrying,
            pending: row.pending,
            success_rate,
            avg_response_time_ms: row.avg_response_time_ms,
            last_delivery_at: row.last_delivery_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_row(success: i64, failed: i64) -> StatsRow {
        StatsRow {
            total: success + failed + 2,
            success,
            failed,
            retrying: 1,
            pending: 1,
            avg_response_time_ms: Some(12.5),
            last_delivery_at: None,
        }
    }

    #[test]
    fn test_success_rate_counts_finished_deliveries_only() {
        let stats = DeliveryStats::from(stats_row(3, 1));
        assert_eq!(stats.total, 6);
        assert!((stats.success_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_rate_without_finished_deliveries() {
        let stats = DeliveryStats::from(stats_row(0, 0));
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_delivery_row_rejects_unknown_status() {
        let now = Utc::now();
        let row = DeliveryRow {
            id: "dlv_1".to_string(),
            subscription_id: "sub_1".to_string(),
            event_type: "ncr.created".to_string(),
            entity_type: "NCR".to_string(),
            entity_id: 1,
            request_payload: "{}".to_string(),
            attempt: 0,
            max_attempts: 3,
            status: "delivered".to_string(),
            next_retry_at: None,
            response_status: None,
            response_body: None,
            response_time_ms: None,
            error_message: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };

        assert!(DeliveryAttempt::try_from(row).is_err());
    }
}
