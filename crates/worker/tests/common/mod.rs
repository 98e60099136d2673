#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use hooks_core::clock::{Clock, ManualClock};
use hooks_core::types::{Event, RetryPolicy, Subscription};
use hooks_db::MemoryStore;
use hooks_worker::{DeliveryContext, Dispatcher, Executor, RetrySweeper};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const EVENT: &str = "ncr.created";
pub const SECRET: &str = "whsec_integration";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub executor: Executor,
    pub dispatcher: Dispatcher,
    pub sweeper: RetrySweeper,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_executor(Executor::new(timeout).unwrap())
    }

    pub fn with_executor(executor: Executor) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let ctx = DeliveryContext::new(store.clone(), store.clone(), executor.clone(), clock.clone());

        Self {
            store,
            clock,
            executor,
            dispatcher: Dispatcher::new(ctx.clone()),
            sweeper: RetrySweeper::new(ctx, Duration::from_secs(15)),
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

pub fn policy(enabled: bool, max_attempts: i32, base_delay_seconds: i32) -> RetryPolicy {
    RetryPolicy {
        enabled,
        max_attempts,
        base_delay_seconds,
    }
}

pub fn subscription(id: &str, url: String, retry_policy: RetryPolicy) -> Subscription {
    let now = start_time();
    Subscription {
        id: id.to_string(),
        name: id.to_string(),
        url,
        secret: SECRET.to_string(),
        event_filter: vec![EVENT.to_string()],
        active: true,
        retry_policy,
        custom_headers: BTreeMap::new(),
        last_triggered_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn event(event_type: &str) -> Event {
    Event {
        event_type: event_type.to_string(),
        entity_type: "NCR".to_string(),
        entity_id: 42,
        data: json!({"id": 42}),
    }
}
