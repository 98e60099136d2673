//! Delivery ledger operations.
//!
//! One row tracks one event sent to one subscription across all of its
//! attempts. Rows are created `pending` and only move forward; terminal rows
//! are never updated by the delivery path.

use chrono::{DateTime, Utc};
use hooks_core::policy::Transition;
use hooks_core::types::{DeliveryAttempt, DeliveryStats, DeliveryStatus, NewDelivery};
use sqlx::{PgPool, QueryBuilder};

use crate::models::{DeliveryRow, StatsRow};

fn decode(row: DeliveryRow) -> Result<DeliveryAttempt, sqlx::Error> {
    DeliveryAttempt::try_from(row).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Create a delivery with `attempt = 0` and status `pending`.
pub async fn create(pool: &PgPool, new: &NewDelivery) -> Result<DeliveryAttempt, sqlx::Error> {
    let row = sqlx::query_as::<_, DeliveryRow>(
        r#"
        INSERT INTO webhook_deliveries
            (id, subscription_id, event_type, entity_type, entity_id,
             request_payload, max_attempts, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING id, subscription_id, event_type, entity_type, entity_id,
                  request_payload, attempt, max_attempts, status, next_retry_at,
                  response_status, response_body, response_time_ms, error_message,
                  delivered_at, created_at, updated_at
        "#,
    )
    .bind(&new.id)
    .bind(&new.subscription_id)
    .bind(&new.event_type)
    .bind(&new.entity_type)
    .bind(new.entity_id)
    .bind(&new.request_payload)
    .bind(new.max_attempts)
    .bind(new.created_at)
    .fetch_one(pool)
    .await?;

    decode(row)
}

pub async fn get_by_id(pool: &PgPool, id: &str) -> Result<Option<DeliveryAttempt>, sqlx::Error> {
    let row = sqlx::query_as::<_, DeliveryRow>(
        r#"
        SELECT id, subscription_id, event_type, entity_type, entity_id,
               request_payload, attempt, max_attempts, status, next_retry_at,
               response_status, response_body, response_time_ms, error_message,
               delivered_at, created_at, updated_at
        FROM webhook_deliveries
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(decode).transpose()
}

/// Write the outcome of an attempt. Rows already in a terminal state are
/// left untouched and `false` is returned.
pub async fn apply_transition(
    pool: &PgPool,
    id: &str,
    transition: &Transition,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET attempt = $1,
            status = $2,
            next_retry_at = $3,
            response_status = $4,
            response_body = $5,
            response_time_ms = $6,
            error_message = $7,
            delivered_at = $8,
            updated_at = now()
        WHERE id = $9 AND status IN ('pending', 'retrying')
        "#,
    )
    .bind(transition.attempt)
    .bind(transition.status.as_str())
    .bind(transition.next_retry_at)
    .bind(transition.response_status)
    .bind(&transition.response_body)
    .bind(transition.response_time_ms)
    .bind(&transition.error_message)
    .bind(transition.delivered_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Deliveries waiting for a retry whose due time has passed, plus `pending`
/// rows old enough that their first attempt was lost.
pub async fn list_due(
    pool: &PgPool,
    now: DateTime<Utc>,
    pending_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<DeliveryAttempt>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DeliveryRow>(
        r#"
        SELECT id, subscription_id, event_type, entity_type, entity_id,
               request_payload, attempt, max_attempts, status, next_retry_at,
               response_status, response_body, response_time_ms, error_message,
               delivered_at, created_at, updated_at
        FROM webhook_deliveries
        WHERE (status = 'retrying' AND next_retry_at <= $1)
           OR (status = 'pending' AND created_at <= $2)
        ORDER BY COALESCE(next_retry_at, created_at) ASC
        LIMIT $3
        "#,
    )
    .bind(now)
    .bind(pending_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(decode).collect()
}

/// Delivery history for a subscription, newest first.
///
/// `cursor` is the id of the last delivery of the previous page.
pub async fn list_by_subscription(
    pool: &PgPool,
    subscription_id: &str,
    status: Option<DeliveryStatus>,
    limit: i64,
    cursor: Option<&str>,
) -> Result<Vec<DeliveryAttempt>, sqlx::Error> {
    let mut qb = QueryBuilder::new(
        r#"
        SELECT id, subscription_id, event_type, entity_type, entity_id,
               request_payload, attempt, max_attempts, status, next_retry_at,
               response_status, response_body, response_time_ms, error_message,
               delivered_at, created_at, updated_at
        FROM webhook_deliveries
        WHERE subscription_id = "#,
    );
    qb.push_bind(subscription_id.to_string());

    if let Some(status) = status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(cursor) = cursor {
        qb.push(
            " AND (created_at, id) < (SELECT created_at, id FROM webhook_deliveries WHERE id = ",
        )
        .push_bind(cursor.to_string())
        .push(")");
    }

    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(limit);

    let rows = qb.build_query_as::<DeliveryRow>().fetch_all(pool).await?;
    rows.into_iter().map(decode).collect()
}

pub async fn stats(pool: &PgPool, subscription_id: &str) -> Result<DeliveryStats, sqlx::Error> {
    let row = sqlx::query_as::<_, StatsRow>(
        r#"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE status = 'success') AS success,
               COUNT(*) FILTER (WHERE status = 'failed') AS failed,
               COUNT(*) FILTER (WHERE status = 'retrying') AS retrying,
               COUNT(*) FILTER (WHERE status = 'pending') AS pending,
               AVG(response_time_ms)::float8 AS avg_response_time_ms,
               MAX(created_at) AS last_delivery_at
        FROM webhook_deliveries
        WHERE subscription_id = $1
        "#,
    )
    .bind(subscription_id)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

/// Re-arm a `failed` or `retrying` delivery so the scheduler picks it up on
/// its next tick. The budget is raised by one when it is already spent so
/// `attempt <= max_attempts` keeps holding.
///
/// Returns `None` when no row in a re-armable state matched.
pub async fn force_retry(
    pool: &PgPool,
    id: &str,
    now: DateTime<Utc>,
) -> Result<Option<DeliveryAttempt>, sqlx::Error> {
    let row = sqlx::query_as::<_, DeliveryRow>(
        r#"
        UPDATE webhook_deliveries
        SET status = 'retrying',
            next_retry_at = $1,
            max_attempts = GREATEST(max_attempts, attempt + 1),
            updated_at = now()
        WHERE id = $2 AND status IN ('failed', 'retrying')
        RETURNING id, subscription_id, event_type, entity_type, entity_id,
                  request_payload, attempt, max_attempts, status, next_retry_at,
                  response_status, response_body, response_time_ms, error_message,
                  delivered_at, created_at, updated_at
        "#,
    )
    .bind(now)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(decode).transpose()
}
