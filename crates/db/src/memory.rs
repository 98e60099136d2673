//! In-process registry and ledger.
//!
//! Used by the test suites and for running the engine without Postgres.
//! Semantics follow the SQL queries: terminal rows are never rewritten and
//! due rows come back oldest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hooks_core::policy::Transition;
use hooks_core::store::{DeliveryLedger, SubscriptionRegistry};
use hooks_core::types::{DeliveryAttempt, DeliveryStatus, NewDelivery, Subscription};
use hooks_core::{StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    subscriptions: RwLock<HashMap<String, Subscription>>,
    deliveries: RwLock<HashMap<String, DeliveryAttempt>>,
    ledger_writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .await
            .insert(subscription.id.clone(), subscription);
    }

    pub async fn set_active(&self, id: &str, active: bool) {
        if let Some(subscription) = self.subscriptions.write().await.get_mut(id) {
            subscription.active = active;
        }
    }

    pub async fn remove_subscription(&self, id: &str) {
        self.subscriptions.write().await.remove(id);
    }

    pub async fn subscription(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.read().await.get(id).cloned()
    }

    pub async fn delivery(&self, id: &str) -> Option<DeliveryAttempt> {
        self.deliveries.read().await.get(id).cloned()
    }

    pub async fn deliveries(&self) -> Vec<DeliveryAttempt> {
        let mut all: Vec<_> = self.deliveries.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub async fn deliveries_for(&self, subscription_id: &str) -> Vec<DeliveryAttempt> {
        self.deliveries()
            .await
            .into_iter()
            .filter(|d| d.subscription_id == subscription_id)
            .collect()
    }

    /// Number of ledger inserts and updates that reached the store.
    pub fn ledger_writes(&self) -> usize {
        self.ledger_writes.load(Ordering::SeqCst)
    }

    /// Make every ledger call fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::backend(std::io::Error::other(
                "memory store unavailable",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRegistry for MemoryStore {
    async fn find_active_by_event(&self, event_type: &str) -> StoreResult<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.active && s.matches(event_type))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Subscription>> {
        Ok(self.subscriptions.read().await.get(id).cloned())
    }

    async fn touch_last_triggered(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(subscription) = self.subscriptions.write().await.get_mut(id) {
            subscription.last_triggered_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryLedger for MemoryStore {
    async fn create(&self, delivery: NewDelivery) -> StoreResult<DeliveryAttempt> {
        self.check_available()?;

        let mut deliveries = self.deliveries.write().await;
        if deliveries.contains_key(&delivery.id) {
            return Err(StoreError::Conflict(format!(
                "delivery {} already exists",
                delivery.id
            )));
        }

        let record = DeliveryAttempt {
            id: delivery.id,
            subscription_id: delivery.subscription_id,
            event_type: delivery.event_type,
            entity_type: delivery.entity_type,
            entity_id: delivery.entity_id,
            request_payload: delivery.request_payload,
            attempt: 0,
            max_attempts: delivery.max_attempts,
            status: DeliveryStatus::Pending,
            next_retry_at: None,
            response_status: None,
            response_body: None,
            response_time_ms: None,
            error_message: None,
            delivered_at: None,
            created_at: delivery.created_at,
            updated_at: delivery.created_at,
        };
        deliveries.insert(record.id.clone(), record.clone());
        self.ledger_writes.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn record_transition(&self, id: &str, transition: &Transition) -> StoreResult<bool> {
        self.check_available()?;

        let mut deliveries = self.deliveries.write().await;
        let Some(record) = deliveries.get_mut(id) else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }

        record.attempt = transition.attempt;
        record.status = transition.status;
        record.next_retry_at = transition.next_retry_at;
        record.response_status = transition.response_status;
        record.response_body = transition.response_body.clone();
        record.response_time_ms = transition.response_time_ms;
        record.error_message = transition.error_message.clone();
        record.delivered_at = transition.delivered_at;
        record.updated_at = Utc::now();
        self.ledger_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<DeliveryAttempt>> {
        self.check_available()?;

        let mut due: Vec<_> = self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| match d.status {
                DeliveryStatus::Retrying => d.next_retry_at.is_some_and(|at| at <= now),
                DeliveryStatus::Pending => d.created_at <= pending_before,
                _ => false,
            })
            .cloned()
            .collect();
        due.sort_by_key(|d| d.next_retry_at.unwrap_or(d.created_at));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use hooks_core::types::RetryPolicy;
    use std::collections::BTreeMap;

    fn subscription(id: &str, events: &[&str], active: bool) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: id.to_string(),
            name: id.to_string(),
            url: "https://ok.example/hook".to_string(),
            secret: "whsec_test".to_string(),
            event_filter: events.iter().map(|e| e.to_string()).collect(),
            active,
            retry_policy: RetryPolicy::default(),
            custom_headers: BTreeMap::new(),
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_delivery(id: &str) -> NewDelivery {
        NewDelivery {
            id: id.to_string(),
            subscription_id: "sub_a".to_string(),
            event_type: "ncr.created".to_string(),
            entity_type: "NCR".to_string(),
            entity_id: 7,
            request_payload: "{}".to_string(),
            max_attempts: 3,
            created_at: Utc::now(),
        }
    }

    fn transition(status: DeliveryStatus, next_retry_at: Option<DateTime<Utc>>) -> Transition {
        Transition {
            attempt: 1,
            status,
            next_retry_at,
            response_status: Some(500),
            response_body: None,
            response_time_ms: Some(5),
            error_message: Some("HTTP 500".to_string()),
            delivered_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_active_by_event_filters_inactive_and_unmatched() {
        let store = MemoryStore::new();
        store.insert_subscription(subscription("sub_a", &["ncr.created"], true)).await;
        store.insert_subscription(subscription("sub_b", &["ncr.created"], false)).await;
        store.insert_subscription(subscription("sub_c", &["ncr.closed"], true)).await;

        let found = store.find_active_by_event("ncr.created").await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "sub_a");
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let store = MemoryStore::new();
        let record = store.create(new_delivery("dlv_1")).await.unwrap();

        assert_eq!(record.status, DeliveryStatus::Pending);
        assert_eq!(record.attempt, 0);
        assert_eq!(store.ledger_writes(), 1);
        assert!(store.create(new_delivery("dlv_1")).await.is_err());
    }

    #[tokio::test]
    async fn test_terminal_rows_are_not_rewritten() {
        let store = MemoryStore::new();
        store.create(new_delivery("dlv_1")).await.unwrap();

        let failed = transition(DeliveryStatus::Failed, None);
        assert!(store.record_transition("dlv_1", &failed).await.unwrap());

        let retry = transition(DeliveryStatus::Retrying, Some(Utc::now()));
        assert!(!store.record_transition("dlv_1", &retry).await.unwrap());
        assert!(!store.record_transition("missing", &retry).await.unwrap());

        let record = store.delivery("dlv_1").await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn test_find_due_orders_and_limits() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (id, offset) in [("dlv_late", -10), ("dlv_early", -60), ("dlv_future", 60)] {
            store.create(new_delivery(id)).await.unwrap();
            let t = transition(DeliveryStatus::Retrying, Some(now + Duration::seconds(offset)));
            store.record_transition(id, &t).await.unwrap();
        }

        let cutoff = now - Duration::hours(1);
        let due = store.find_due(now, cutoff, 10).await.unwrap();
        let ids: Vec<_> = due.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["dlv_early", "dlv_late"]);

        assert_eq!(store.find_due(now, cutoff, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_due_includes_stale_pending_rows() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut stale = new_delivery("dlv_stale");
        stale.created_at = now - Duration::minutes(10);
        store.create(stale).await.unwrap();

        let mut fresh = new_delivery("dlv_fresh");
        fresh.created_at = now;
        store.create(fresh).await.unwrap();

        let due = store
            .find_due(now, now - Duration::minutes(1), 10)
            .await
            .unwrap();
        let ids: Vec<_> = due.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["dlv_stale"]);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.create(new_delivery("dlv_1")).await,
            Err(StoreError::Backend(_))
        ));
        assert_eq!(store.ledger_writes(), 0);
    }
}
