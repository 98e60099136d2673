//! Periodic re-delivery of rows whose backoff window has elapsed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use hooks_core::policy;
use hooks_core::types::DeliveryAttempt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::context::DeliveryContext;
use crate::report::{BranchReport, BranchResult, RunSummary};
use crate::scheduler::PeriodicJob;

pub const DEFAULT_BATCH_SIZE: i64 = 100;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct RetrySweeper {
    ctx: Arc<DeliveryContext>,
    interval: Duration,
    batch_size: i64,
    concurrency: usize,
    pending_grace: Duration,
}

impl RetrySweeper {
    /// `pending` rows older than twice the delivery timeout are treated as
    /// lost first attempts and retried.
    pub fn new(ctx: DeliveryContext, interval: Duration) -> Self {
        let pending_grace = ctx.executor.timeout() * 2;
        Self {
            ctx: Arc::new(ctx),
            interval,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            pending_grace,
        }
    }

    pub fn with_pending_grace(mut self, grace: Duration) -> Self {
        self.pending_grace = grace;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Process every row that is due now. Rows are independent; a failure on
    /// one is logged and the rest continue. A row whose bookkeeping failed
    /// keeps its status and is picked up again on a later pass.
    pub async fn sweep(&self) -> RunSummary {
        let now = self.ctx.clock.now();
        let grace = chrono::Duration::from_std(self.pending_grace).unwrap_or(chrono::Duration::MAX);
        let pending_before = now.checked_sub_signed(grace).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let due = match self.ctx.ledger.find_due(now, pending_before, self.batch_size).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "failed to load due deliveries");
                return RunSummary::default();
            }
        };

        if due.is_empty() {
            return RunSummary::default();
        }
        debug!(count = due.len(), "retrying due deliveries");

        let reports = stream::iter(due)
            .map(|record| {
                let ctx = self.ctx.clone();
                let subscription_id = record.subscription_id.clone();
                let delivery_id = record.id.clone();
                async move {
                    match tokio::spawn(async move { retry_one(&ctx, record).await }).await {
                        Ok(report) => report,
                        Err(err) => BranchReport {
                            subscription_id,
                            delivery_id: Some(delivery_id),
                            result: BranchResult::Aborted {
                                error: format!("retry task failed: {}", err),
                            },
                        },
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let summary = RunSummary { reports };
        summary.log("retry", None);
        summary
    }
}

async fn retry_one(ctx: &DeliveryContext, record: DeliveryAttempt) -> BranchReport {
    let subscription = match ctx.registry.find_by_id(&record.subscription_id).await {
        Ok(subscription) => subscription,
        Err(err) => {
            error!(
                delivery_id = %record.id,
                subscription_id = %record.subscription_id,
                error = %err,
                "failed to load subscription for retry"
            );
            return BranchReport {
                subscription_id: record.subscription_id,
                delivery_id: Some(record.id),
                result: BranchResult::Aborted {
                    error: err.to_string(),
                },
            };
        }
    };

    let subscription = match subscription {
        Some(subscription) if subscription.active => subscription,
        _ => {
            info!(
                delivery_id = %record.id,
                subscription_id = %record.subscription_id,
                "subscription gone or inactive, failing delivery"
            );
            let transition = policy::subscription_unavailable(&record);
            return ctx
                .persist(&record.subscription_id, &record.id, &transition)
                .await;
        }
    };

    let outcome = ctx.executor.attempt(&subscription, &record).await;
    let transition = policy::after_attempt(&record, &subscription, &outcome, ctx.clock.now());
    debug!(
        delivery_id = %record.id,
        subscription_id = %subscription.id,
        attempt = transition.attempt,
        status = %transition.status,
        "retry attempted"
    );
    ctx.persist(&subscription.id, &record.id, &transition).await
}

#[async_trait]
impl PeriodicJob for RetrySweeper {
    fn name(&self) -> &str {
        "retry-sweeper"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) {
        self.sweep().await;
    }
}
