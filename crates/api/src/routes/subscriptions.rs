use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use hooks_core::clock::Clock;
use hooks_core::signer;
use hooks_core::types::{NewSubscription, RetryPolicy, Subscription, SubscriptionChanges};
use hooks_core::validation::{
    normalize_event_filter, validate_custom_headers, validate_name, validate_retry_policy,
    validate_url, ValidationError,
};
use hooks_db::queries::subscriptions;
use hooks_worker::ProbeReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::{
    error::{AppError, ApiResult, ResultExt},
    extract::ApiJson,
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/subscriptions",
            post(create_subscription).get(list_subscriptions),
        )
        .route(
            "/v1/subscriptions/{id}",
            get(get_subscription)
                .patch(update_subscription)
                .delete(delete_subscription),
        )
        .route("/v1/subscriptions/{id}/secret", post(regenerate_secret))
        .route("/v1/subscriptions/{id}/test", post(test_subscription))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetryPolicyInput {
    enabled: Option<bool>,
    max_attempts: Option<i32>,
    base_delay_seconds: Option<i32>,
}

impl RetryPolicyInput {
    fn apply(&self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            enabled: self.enabled.unwrap_or(base.enabled),
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            base_delay_seconds: self.base_delay_seconds.unwrap_or(base.base_delay_seconds),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionRequest {
    name: String,
    url: String,
    event_filter: Vec<String>,
    retry_policy: Option<RetryPolicyInput>,
    custom_headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSubscriptionRequest {
    name: Option<String>,
    url: Option<String>,
    event_filter: Option<Vec<String>>,
    active: Option<bool>,
    retry_policy: Option<RetryPolicyInput>,
    custom_headers: Option<BTreeMap<String, String>>,
}

/// A subscription as returned by the admin API. The secret is only present
/// right after it was generated.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionView {
    id: String,
    name: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
    event_filter: Vec<String>,
    active: bool,
    retry_policy: RetryPolicy,
    custom_headers: BTreeMap<String, String>,
    last_triggered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SubscriptionView {
    fn redacted(sub: Subscription) -> Self {
        Self::build(sub, false)
    }

    fn with_secret(sub: Subscription) -> Self {
        Self::build(sub, true)
    }

    fn build(sub: Subscription, reveal: bool) -> Self {
        SubscriptionView {
            id: sub.id,
            name: sub.name,
            url: sub.url,
            secret: reveal.then_some(sub.secret),
            event_filter: sub.event_filter,
            active: sub.active,
            retry_policy: sub.retry_policy,
            custom_headers: sub.custom_headers,
            last_triggered_at: sub.last_triggered_at,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionListResponse {
    items: Vec<SubscriptionView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretResponse {
    id: String,
    secret: String,
}

fn check_url(raw: &str, env: &str) -> Result<String, ValidationError> {
    let url = validate_url(raw, env)?;
    if url.scheme() == "http" {
        warn!(url = %url, "subscription target uses plaintext http");
    }
    Ok(raw.trim().to_string())
}

fn new_subscription(
    payload: CreateSubscriptionRequest,
    env: &str,
) -> Result<NewSubscription, ValidationError> {
    validate_name(&payload.name)?;
    let url = check_url(&payload.url, env)?;
    let event_filter = normalize_event_filter(&payload.event_filter)?;
    let retry_policy = payload
        .retry_policy
        .unwrap_or_default()
        .apply(RetryPolicy::default());
    validate_retry_policy(&retry_policy)?;
    let custom_headers = payload.custom_headers.unwrap_or_default();
    validate_custom_headers(&custom_headers)?;

    Ok(NewSubscription {
        id: format!("sub_{}", nanoid::nanoid!(12)),
        name: payload.name.trim().to_string(),
        url,
        secret: signer::generate_secret(),
        event_filter,
        retry_policy,
        custom_headers,
    })
}

fn subscription_changes(
    payload: UpdateSubscriptionRequest,
    existing: &Subscription,
    env: &str,
) -> Result<SubscriptionChanges, ValidationError> {
    let mut changes = SubscriptionChanges {
        active: payload.active,
        ..Default::default()
    };

    if let Some(name) = payload.name {
        validate_name(&name)?;
        changes.name = Some(name.trim().to_string());
    }
    if let Some(url) = payload.url {
        changes.url = Some(check_url(&url, env)?);
    }
    if let Some(filter) = payload.event_filter {
        changes.event_filter = Some(normalize_event_filter(&filter)?);
    }
    if let Some(input) = payload.retry_policy {
        let policy = input.apply(existing.retry_policy);
        validate_retry_policy(&policy)?;
        changes.retry_policy = Some(policy);
    }
    if let Some(headers) = payload.custom_headers {
        validate_custom_headers(&headers)?;
        changes.custom_headers = Some(headers);
    }

    Ok(changes)
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("subscription {} not found", id))
}

async fn create_subscription(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    ApiJson(payload): ApiJson<CreateSubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<SubscriptionView>)> {
    let new = new_subscription(payload, &state.hooks_env).for_request(&request_id)?;
    let subscription = subscriptions::create(&state.db, &new)
        .await
        .for_request(&request_id)?;

    info!(
        subscription_id = %subscription.id,
        events = ?subscription.event_filter,
        "subscription created"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionView::with_secret(subscription)),
    ))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<SubscriptionListResponse>> {
    let items = subscriptions::list(&state.db)
        .await
        .for_request(&request_id)?
        .into_iter()
        .map(SubscriptionView::redacted)
        .collect();

    Ok(Json(SubscriptionListResponse { items }))
}

async fn get_subscription(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubscriptionView>> {
    let subscription = subscriptions::get_by_id(&state.db, &id)
        .await
        .for_request(&request_id)?
        .ok_or_else(|| not_found(&id).with_request_id(&request_id.0))?;

    Ok(Json(SubscriptionView::redacted(subscription)))
}

async fn update_subscription(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<UpdateSubscriptionRequest>,
) -> ApiResult<Json<SubscriptionView>> {
    let existing = subscriptions::get_by_id(&state.db, &id)
        .await
        .for_request(&request_id)?
        .ok_or_else(|| not_found(&id).with_request_id(&request_id.0))?;

    let changes =
        subscription_changes(payload, &existing, &state.hooks_env).for_request(&request_id)?;
    if changes.is_empty() {
        return Err(AppError::BadRequest("no fields to update".to_string())
            .with_request_id(&request_id.0));
    }

    let updated = subscriptions::update(&state.db, &id, &changes)
        .await
        .for_request(&request_id)?
        .ok_or_else(|| not_found(&id).with_request_id(&request_id.0))?;

    info!(subscription_id = %id, active = updated.active, "subscription updated");
    Ok(Json(SubscriptionView::redacted(updated)))
}

async fn regenerate_secret(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<SecretResponse>> {
    let secret = signer::generate_secret();
    let subscription = subscriptions::regenerate_secret(&state.db, &id, &secret)
        .await
        .for_request(&request_id)?
        .ok_or_else(|| not_found(&id).with_request_id(&request_id.0))?;

    info!(subscription_id = %id, "subscription secret rotated");
    Ok(Json(SecretResponse {
        id: subscription.id,
        secret: subscription.secret,
    }))
}

async fn delete_subscription(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let deleted = subscriptions::delete(&state.db, &id)
        .await
        .for_request(&request_id)?;
    if !deleted {
        return Err(not_found(&id).with_request_id(&request_id.0));
    }

    info!(subscription_id = %id, "subscription deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Send one synthetic `webhook.test` event to the endpoint. Nothing is
/// written to the ledger.
async fn test_subscription(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProbeReport>> {
    let subscription = subscriptions::get_by_id(&state.db, &id)
        .await
        .for_request(&request_id)?
        .ok_or_else(|| not_found(&id).with_request_id(&request_id.0))?;

    let report = state.executor.probe(&subscription, state.clock.now()).await;
    info!(
        subscription_id = %id,
        success = report.success,
        status_code = ?report.status_code,
        response_time_ms = report.response_time_ms,
        "test delivery sent"
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request(url: &str) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            name: " quality ".to_string(),
            url: url.to_string(),
            event_filter: vec!["ncr.created".to_string(), " ncr.created ".to_string()],
            retry_policy: None,
            custom_headers: None,
        }
    }

    fn existing() -> Subscription {
        let now = Utc::now();
        Subscription {
            id: "sub_1".to_string(),
            name: "quality".to_string(),
            url: "https://ok.example/hook".to_string(),
            secret: "whsec_existing".to_string(),
            event_filter: vec!["ncr.created".to_string()],
            active: true,
            retry_policy: RetryPolicy {
                enabled: true,
                max_attempts: 5,
                base_delay_seconds: 30,
            },
            custom_headers: BTreeMap::new(),
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_new_subscription_defaults() {
        let new = new_subscription(create_request("https://ok.example/hook"), "dev").unwrap();

        assert!(new.id.starts_with("sub_"));
        assert!(new.secret.starts_with(signer::SECRET_PREFIX));
        assert_eq!(new.name, "quality");
        assert_eq!(new.event_filter, vec!["ncr.created".to_string()]);
        assert_eq!(new.retry_policy, RetryPolicy::default());
    }

    #[test]
    fn test_new_subscription_rejects_bad_input() {
        assert!(new_subscription(create_request("ftp://ok.example"), "dev").is_err());
        assert!(new_subscription(create_request("http://localhost/hook"), "production").is_err());
        assert!(new_subscription(create_request("http://localhost/hook"), "dev").is_ok());

        let mut req = create_request("https://ok.example/hook");
        req.event_filter = vec![" ".to_string()];
        assert!(matches!(
            new_subscription(req, "dev"),
            Err(ValidationError::EmptyFilter)
        ));

        let mut req = create_request("https://ok.example/hook");
        req.retry_policy = Some(RetryPolicyInput {
            max_attempts: Some(21),
            ..Default::default()
        });
        assert!(matches!(
            new_subscription(req, "dev"),
            Err(ValidationError::MaxAttempts)
        ));

        let mut req = create_request("https://ok.example/hook");
        req.custom_headers = Some(BTreeMap::from([(
            "X-Webhook-Signature".to_string(),
            "x".to_string(),
        )]));
        assert!(matches!(
            new_subscription(req, "dev"),
            Err(ValidationError::ReservedHeader(_))
        ));
    }

    #[test]
    fn test_partial_retry_policy_keeps_existing_values() {
        let payload = UpdateSubscriptionRequest {
            retry_policy: Some(RetryPolicyInput {
                enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let changes = subscription_changes(payload, &existing(), "dev").unwrap();

        assert_eq!(
            changes.retry_policy,
            Some(RetryPolicy {
                enabled: false,
                max_attempts: 5,
                base_delay_seconds: 30,
            })
        );
        assert!(changes.url.is_none());
    }

    #[test]
    fn test_empty_update_has_no_changes() {
        let changes =
            subscription_changes(UpdateSubscriptionRequest::default(), &existing(), "dev").unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_view_redacts_secret() {
        let view = serde_json::to_value(SubscriptionView::redacted(existing())).unwrap();
        assert!(view.get("secret").is_none());
        assert_eq!(view["retryPolicy"]["maxAttempts"], 5);

        let view = serde_json::to_value(SubscriptionView::with_secret(existing())).unwrap();
        assert_eq!(view["secret"], "whsec_existing");
    }
}
