use axum::{extract::State, http::StatusCode, routing::post, Extension, Json, Router};
use hooks_core::types::Event;
use serde::Serialize;
use tracing::info;

use crate::{
    error::{AppError, ApiResult},
    extract::ApiJson,
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/events", post(publish_event))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    status: &'static str,
    event_type: String,
}

/// Hand the event to the dispatcher and answer before any delivery runs.
async fn publish_event(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    ApiJson(event): ApiJson<Event>,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    if event.event_type.trim().is_empty() {
        return Err(AppError::BadRequest("eventType required".to_string()).with_request_id(&request_id.0));
    }

    info!(
        request_id = %request_id.0,
        event_type = %event.event_type,
        entity_type = %event.entity_type,
        entity_id = event.entity_id,
        "event accepted"
    );

    let event_type = event.event_type.clone();
    state.dispatcher.publish_detached(event);

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            status: "accepted",
            event_type,
        }),
    ))
}
