//! Fan-out of published events to matching subscriptions.

use futures_util::future::join_all;
use hooks_core::policy;
use hooks_core::types::{Event, NewDelivery, Subscription};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::context::DeliveryContext;
use crate::report::{BranchReport, BranchResult, RunSummary};
use crate::request::build_body;

pub fn delivery_id() -> String {
    format!("dlv_{}", nanoid::nanoid!(12))
}

#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<DeliveryContext>,
    detached: Arc<Mutex<JoinSet<()>>>,
}

impl Dispatcher {
    pub fn new(ctx: DeliveryContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            detached: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    fn detached(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.detached.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn context(&self) -> &DeliveryContext {
        &self.ctx
    }

    /// Deliver `event` to every active subscription whose filter names its
    /// type. Branches run concurrently and each one is bounded by the
    /// executor timeout. Nothing here fails the caller: registry and ledger
    /// errors end up in the returned summary and the logs.
    pub async fn publish(&self, event: Event) -> RunSummary {
        let subscriptions = match self.ctx.registry.find_active_by_event(&event.event_type).await {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                error!(
                    event_type = %event.event_type,
                    error = %err,
                    "failed to resolve subscriptions"
                );
                return RunSummary::default();
            }
        };

        if subscriptions.is_empty() {
            debug!(event_type = %event.event_type, "no subscriptions for event");
            return RunSummary::default();
        }

        let body = match build_body(&event.event_type, &event.data, self.ctx.clock.now()) {
            Ok(body) => Arc::new(body),
            Err(err) => {
                error!(event_type = %event.event_type, error = %err, "failed to encode event");
                return RunSummary::default();
            }
        };
        let event = Arc::new(event);

        let branches: Vec<(String, JoinHandle<BranchReport>)> = subscriptions
            .into_iter()
            .map(|subscription| {
                let id = subscription.id.clone();
                let ctx = self.ctx.clone();
                let event = event.clone();
                let body = body.clone();
                let handle =
                    tokio::spawn(async move { deliver(&ctx, subscription, &event, &body).await });
                (id, handle)
            })
            .collect();

        let (ids, handles): (Vec<_>, Vec<_>) = branches.into_iter().unzip();
        let reports = join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, subscription_id)| match joined {
                Ok(report) => report,
                Err(err) => BranchReport {
                    subscription_id,
                    delivery_id: None,
                    result: BranchResult::Aborted {
                        error: format!("delivery task failed: {}", err),
                    },
                },
            })
            .collect();

        let summary = RunSummary { reports };
        summary.log("publish", Some(event.event_type.as_str()));
        summary
    }

    /// Run [`Dispatcher::publish`] in the background and return immediately.
    /// The task is tracked until [`Dispatcher::drain`] waits for it.
    pub fn publish_detached(&self, event: Event) {
        let dispatcher = self.clone();
        let mut tasks = self.detached();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            dispatcher.publish(event).await;
        });
    }

    /// Number of detached publishes that have not been reaped yet.
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.detached();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Wait for every detached publish started so far. Called on shutdown
    /// so background branches record their outcome before the runtime stops.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.detached());
        if tasks.is_empty() {
            return;
        }
        info!(count = tasks.len(), "waiting for detached publishes");
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "detached publish task failed");
            }
        }
    }
}

async fn deliver(
    ctx: &DeliveryContext,
    subscription: Subscription,
    event: &Event,
    body: &str,
) -> BranchReport {
    let new = NewDelivery {
        id: delivery_id(),
        subscription_id: subscription.id.clone(),
        event_type: event.event_type.clone(),
        entity_type: event.entity_type.clone(),
        entity_id: event.entity_id,
        request_payload: body.to_string(),
        max_attempts: subscription.retry_policy.max_attempts,
        created_at: ctx.clock.now(),
    };

    let record = match ctx.ledger.create(new).await {
        Ok(record) => record,
        Err(err) => {
            error!(
                subscription_id = %subscription.id,
                event_type = %event.event_type,
                error = %err,
                "failed to create delivery record"
            );
            return BranchReport {
                subscription_id: subscription.id,
                delivery_id: None,
                result: BranchResult::Aborted {
                    error: err.to_string(),
                },
            };
        }
    };

    let outcome = ctx.executor.attempt(&subscription, &record).await;
    let now = ctx.clock.now();

    if let Err(err) = ctx.registry.touch_last_triggered(&subscription.id, now).await {
        warn!(subscription_id = %subscription.id, error = %err, "failed to update last triggered time");
    }

    let transition = policy::after_attempt(&record, &subscription, &outcome, now);
    debug!(
        subscription_id = %subscription.id,
        delivery_id = %record.id,
        status = %transition.status,
        response_status = ?outcome.status_code,
        response_time_ms = outcome.response_time_ms,
        "delivery attempted"
    );
    ctx.persist(&subscription.id, &record.id, &transition).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_id_format() {
        let id = delivery_id();
        assert!(id.starts_with("dlv_"));
        assert_eq!(id.len(), 16);
        assert_ne!(id, delivery_id());
    }
}
