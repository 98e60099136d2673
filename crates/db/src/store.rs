use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hooks_core::policy::Transition;
use hooks_core::store::{DeliveryLedger, SubscriptionRegistry};
use hooks_core::types::{DeliveryAttempt, NewDelivery, Subscription};
use hooks_core::{StoreError, StoreResult};
use sqlx::PgPool;

use crate::queries::{deliveries, subscriptions};

/// Postgres-backed registry and ledger.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SubscriptionRegistry for PgStore {
    async fn find_active_by_event(&self, event_type: &str) -> StoreResult<Vec<Subscription>> {
        subscriptions::list_active_by_event(&self.pool, event_type)
            .await
            .map_err(StoreError::backend)
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Subscription>> {
        subscriptions::get_by_id(&self.pool, id)
            .await
            .map_err(StoreError::backend)
    }

    async fn touch_last_triggered(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        subscriptions::touch_last_triggered(&self.pool, id, at)
            .await
            .map_err(StoreError::backend)
    }
}

#[async_trait]
impl DeliveryLedger for PgStore {
    async fn create(&self, delivery: NewDelivery) -> StoreResult<DeliveryAttempt> {
        deliveries::create(&self.pool, &delivery)
            .await
            .map_err(StoreError::backend)
    }

    async fn record_transition(&self, id: &str, transition: &Transition) -> StoreResult<bool> {
        deliveries::apply_transition(&self.pool, id, transition)
            .await
            .map_err(StoreError::backend)
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<DeliveryAttempt>> {
        deliveries::list_due(&self.pool, now, pending_before, limit)
            .await
            .map_err(StoreError::backend)
    }
}
