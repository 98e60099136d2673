//! Checks applied when a subscription is written. Anything rejected here
//! never reaches the delivery path.

use std::collections::{BTreeMap, BTreeSet};
use url::{Host, Url};

use crate::types::RetryPolicy;

pub const MAX_ATTEMPTS_LIMIT: i32 = 20;
pub const MAX_BASE_DELAY_SECONDS: i32 = 86_400;

/// Headers owned by the delivery engine. Any `X-Webhook-*` name is reserved
/// as well.
pub const RESERVED_HEADERS: [&str; 1] = ["content-type"];
pub const RESERVED_HEADER_PREFIX: &str = "x-webhook-";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("url is not a valid absolute url: {0}")]
    InvalidUrl(String),
    #[error("url must use http or https")]
    UnsupportedScheme,
    #[error("url cannot target localhost in production")]
    LocalTarget,
    #[error("eventFilter must contain at least one event type")]
    EmptyFilter,
    #[error("maxAttempts must be between 1 and 20")]
    MaxAttempts,
    #[error("baseDelaySeconds must be between 1 and 86400")]
    BaseDelay,
    #[error("invalid header name: {0}")]
    HeaderName(String),
    #[error("invalid value for header {0}")]
    HeaderValue(String),
    #[error("header {0} is managed by the delivery engine")]
    ReservedHeader(String),
    #[error("name required")]
    EmptyName,
}

/// Parse and check a subscription target.
///
/// Plaintext `http` is allowed; callers can inspect `scheme()` on the
/// returned url to warn about it.
pub fn validate_url(raw: &str, env: &str) -> Result<Url, ValidationError> {
    let url = Url::parse(raw.trim()).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::UnsupportedScheme);
    }

    let host = url
        .host()
        .ok_or_else(|| ValidationError::InvalidUrl("missing host".to_string()))?;

    if env == "production" && is_local(&host) {
        return Err(ValidationError::LocalTarget);
    }

    Ok(url)
}

fn is_local(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => domain.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(addr) => addr.is_loopback() || addr.is_unspecified(),
        Host::Ipv6(addr) => addr.is_loopback() || addr.is_unspecified(),
    }
}

/// Trim, drop blanks and de-duplicate; the result is sorted.
pub fn normalize_event_filter(filter: &[String]) -> Result<Vec<String>, ValidationError> {
    let events: BTreeSet<String> = filter
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect();

    if events.is_empty() {
        return Err(ValidationError::EmptyFilter);
    }
    Ok(events.into_iter().collect())
}

pub fn validate_retry_policy(policy: &RetryPolicy) -> Result<(), ValidationError> {
    if !(1..=MAX_ATTEMPTS_LIMIT).contains(&policy.max_attempts) {
        return Err(ValidationError::MaxAttempts);
    }
    if !(1..=MAX_BASE_DELAY_SECONDS).contains(&policy.base_delay_seconds) {
        return Err(ValidationError::BaseDelay);
    }
    Ok(())
}

pub fn validate_custom_headers(headers: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    for (name, value) in headers {
        if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(ValidationError::HeaderName(name.clone()));
        }
        let lower = name.to_ascii_lowercase();
        if RESERVED_HEADERS.contains(&lower.as_str()) || lower.starts_with(RESERVED_HEADER_PREFIX) {
            return Err(ValidationError::ReservedHeader(name.clone()));
        }
        if !value.bytes().all(|b| b == b'\t' || (b' '..=b'~').contains(&b)) {
            return Err(ValidationError::HeaderValue(name.clone()));
        }
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(())
}

// RFC 9110 token characters
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
