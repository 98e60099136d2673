use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::{
    error::{AppError, ApiError},
    state::{AppState, RequestId},
};

/// Require `Authorization: Bearer <admin token>` on every request.
pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(parse_bearer)
        .is_some_and(|token| token_matches(token, &state.admin_token));

    if !authorized {
        warn!(%request_id, path = %req.uri().path(), "rejected admin request");
        return Err(AppError::Unauthorized.with_request_id(&request_id));
    }

    Ok(next.run(req).await)
}

fn parse_bearer(value: &HeaderValue) -> Option<&str> {
    let value = value.to_str().ok()?;
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default();
    if scheme != "Bearer" || token.is_empty() {
        return None;
    }
    Some(token)
}

/// Compare digests so neither the length nor the content of the expected
/// token leaks through timing.
fn token_matches(candidate: &str, expected: &str) -> bool {
    let candidate = Sha256::digest(candidate.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    candidate.as_slice().ct_eq(expected.as_slice()).into()
}
