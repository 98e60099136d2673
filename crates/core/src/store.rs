//! Persistence ports consumed by the delivery engine.
//!
//! Every mutation is scoped to one row, identified by subscription id or
//! delivery id, so implementations need no cross-row locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::policy::Transition;
use crate::types::{DeliveryAttempt, NewDelivery, Subscription};

#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// Active subscriptions whose filter contains `event_type`, in no
    /// particular order.
    async fn find_active_by_event(&self, event_type: &str) -> StoreResult<Vec<Subscription>>;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Subscription>>;

    async fn touch_last_triggered(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()>;
}

#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Insert a fresh `pending` row with `attempt = 0`.
    async fn create(&self, delivery: NewDelivery) -> StoreResult<DeliveryAttempt>;

    /// Write a transition onto a row that is still `pending` or `retrying`.
    ///
    /// Returns `false` when the row is missing or already terminal, in which
    /// case nothing was written.
    async fn record_transition(&self, id: &str, transition: &Transition) -> StoreResult<bool>;

    /// Rows that need an attempt: `retrying` rows whose `next_retry_at` is at
    /// or before `now`, and `pending` rows created at or before
    /// `pending_before` whose first attempt never completed. Oldest due first.
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<DeliveryAttempt>>;
}
