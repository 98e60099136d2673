use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use hooks_core::clock::Clock;
use hooks_core::types::{DeliveryAttempt, DeliveryStats, DeliveryStatus};
use hooks_db::queries::deliveries;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{AppError, ApiResult, ResultExt},
    state::{AppState, RequestId},
};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/subscriptions/{id}/deliveries", get(list_deliveries))
        .route("/v1/subscriptions/{id}/stats", get(delivery_stats))
        .route("/v1/deliveries/{id}/retry", post(retry_delivery))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
    cursor: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryListResponse {
    items: Vec<DeliveryAttempt>,
    next_cursor: Option<String>,
}

fn page_size(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

fn next_cursor(items: &[DeliveryAttempt], limit: i64) -> Option<String> {
    if (items.len() as i64) < limit {
        return None;
    }
    items.last().map(|d| d.id.clone())
}

/// History is kept after a subscription is deleted, so an unknown id yields
/// an empty page rather than a 404.
async fn list_deliveries(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<DeliveryListResponse>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<DeliveryStatus>)
        .transpose()
        .map_err(|err| AppError::BadRequest(err.to_string()).with_request_id(&request_id.0))?;
    let limit = page_size(query.limit);

    let items = deliveries::list_by_subscription(
        &state.db,
        &id,
        status,
        limit,
        query.cursor.as_deref(),
    )
    .await
    .for_request(&request_id)?;

    let next_cursor = next_cursor(&items, limit);
    Ok(Json(DeliveryListResponse { items, next_cursor }))
}

async fn delivery_stats(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeliveryStats>> {
    let stats = deliveries::stats(&state.db, &id)
        .await
        .for_request(&request_id)?;
    Ok(Json(stats))
}

/// Put a `failed` or `retrying` delivery back on the schedule, due now.
async fn retry_delivery(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeliveryAttempt>> {
    let existing = deliveries::get_by_id(&state.db, &id)
        .await
        .for_request(&request_id)?
        .ok_or_else(|| {
            AppError::NotFound(format!("delivery {} not found", id)).with_request_id(&request_id.0)
        })?;

    if !is_retryable(existing.status) {
        return Err(conflict(&id, existing.status).with_request_id(&request_id.0));
    }

    let updated = deliveries::force_retry(&state.db, &id, state.clock.now())
        .await
        .for_request(&request_id)?
        .ok_or_else(|| conflict(&id, existing.status).with_request_id(&request_id.0))?;

    info!(
        delivery_id = %id,
        subscription_id = %updated.subscription_id,
        attempt = updated.attempt,
        max_attempts = updated.max_attempts,
        "delivery re-armed for retry"
    );
    Ok(Json(updated))
}

fn is_retryable(status: DeliveryStatus) -> bool {
    matches!(status, DeliveryStatus::Failed | DeliveryStatus::Retrying)
}

fn conflict(id: &str, status: DeliveryStatus) -> AppError {
    AppError::Conflict(format!("delivery {} is {} and cannot be retried", id, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn delivery(id: &str) -> DeliveryAttempt {
        let now = Utc::now();
        DeliveryAttempt {
            id: id.to_string(),
            subscription_id: "sub_1".to_string(),
            event_type: "ncr.created".to_string(),
            entity_type: "NCR".to_string(),
            entity_id: 1,
            request_payload: "{}".to_string(),
            attempt: 1,
            max_attempts: 3,
            status: DeliveryStatus::Success,
            next_retry_at: None,
            response_status: Some(200),
            response_body: None,
            response_time_ms: Some(10),
            error_message: None,
            delivered_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_page_size_is_clamped() {
        assert_eq!(page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(0)), 1);
        assert_eq!(page_size(Some(10_000)), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_next_cursor_only_on_full_page() {
        let items = vec![delivery("dlv_a"), delivery("dlv_b")];
        assert_eq!(next_cursor(&items, 2), Some("dlv_b".to_string()));
        assert_eq!(next_cursor(&items, 3), None);
        assert_eq!(next_cursor(&[], 1), None);
    }

    #[test]
    fn test_only_failed_and_retrying_are_retryable() {
        assert!(is_retryable(DeliveryStatus::Failed));
        assert!(is_retryable(DeliveryStatus::Retrying));
        assert!(!is_retryable(DeliveryStatus::Success));
        assert!(!is_retryable(DeliveryStatus::Pending));
    }

    #[test]
    fn test_conflict_message_names_status() {
        let AppError::Conflict(msg) = conflict("dlv_1", DeliveryStatus::Success) else {
            panic!("expected conflict");
        };
        assert_eq!(msg, "delivery dlv_1 is success and cannot be retried");
    }
}
