//! Builds the body and headers of every outbound callback.
//!
//! Production deliveries and the diagnostic probe both go through
//! [`DeliveryRequest`], so an endpoint that passes the probe sees exactly the
//! headers and signature scheme real deliveries use.

use chrono::{DateTime, Utc};
use hooks_core::signer;
use hooks_core::types::{Envelope, Subscription};
use hooks_core::validation::{RESERVED_HEADERS, RESERVED_HEADER_PREFIX};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use tracing::warn;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const EVENT_HEADER: &str = "x-webhook-event";
pub const RETRY_ATTEMPT_HEADER: &str = "x-webhook-retry-attempt";

/// Serialize the canonical callback body once; the resulting string is what
/// gets stored and signed.
pub fn build_body(event_type: &str, data: &Value, timestamp: DateTime<Utc>) -> serde_json::Result<String> {
    Envelope {
        event: event_type,
        timestamp,
        data,
    }
    .to_body()
}

#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    pub subscription: &'a Subscription,
    pub event_type: &'a str,
    pub body: &'a str,
    /// 1 for the first try, incremented on every retry.
    pub attempt_number: i32,
}

impl<'a> DeliveryRequest<'a> {
    pub fn new(
        subscription: &'a Subscription,
        event_type: &'a str,
        body: &'a str,
        attempt_number: i32,
    ) -> Self {
        Self {
            subscription,
            event_type,
            body,
            attempt_number,
        }
    }

    pub fn signature(&self) -> String {
        signer::sign(self.body.as_bytes(), &self.subscription.secret)
    }

    /// Custom headers first, then the engine headers on top so they always
    /// win.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.subscription.custom_headers {
            let lower = name.to_ascii_lowercase();
            if RESERVED_HEADERS.contains(&lower.as_str()) || lower.starts_with(RESERVED_HEADER_PREFIX) {
                warn!(
                    subscription_id = %self.subscription.id,
                    header = %name,
                    "skipping custom header that shadows a delivery header"
                );
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(
                    subscription_id = %self.subscription.id,
                    header = %name,
                    "skipping invalid custom header"
                ),
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        insert(&mut headers, SIGNATURE_HEADER, &self.signature());
        insert(&mut headers, EVENT_HEADER, self.event_type);
        insert(
            &mut headers,
            RETRY_ATTEMPT_HEADER,
            &self.attempt_number.max(1).to_string(),
        );

        headers
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => warn!(header = name, "dropping header with invalid value"),
    }
}
