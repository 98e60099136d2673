use hooks_core::clock::Clock;
use hooks_core::policy::Transition;
use hooks_core::store::{DeliveryLedger, SubscriptionRegistry};
use std::sync::Arc;
use tracing::error;

use crate::executor::Executor;
use crate::report::{BranchReport, BranchResult};

/// Everything a delivery branch needs, shared by the dispatcher and the
/// retry sweeper.
#[derive(Clone)]
pub struct DeliveryContext {
    pub registry: Arc<dyn SubscriptionRegistry>,
    pub ledger: Arc<dyn DeliveryLedger>,
    pub executor: Executor,
    pub clock: Arc<dyn Clock>,
}

impl DeliveryContext {
    pub fn new(
        registry: Arc<dyn SubscriptionRegistry>,
        ledger: Arc<dyn DeliveryLedger>,
        executor: Executor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            ledger,
            executor,
            clock,
        }
    }

    /// Write a transition and turn the result into a branch report.
    pub(crate) async fn persist(
        &self,
        subscription_id: &str,
        delivery_id: &str,
        transition: &Transition,
    ) -> BranchReport {
        let result = match self.ledger.record_transition(delivery_id, transition).await {
            Ok(true) => BranchResult::from_transition(transition),
            Ok(false) => BranchResult::Stale,
            Err(err) => {
                error!(
                    subscription_id,
                    delivery_id,
                    error = %err,
                    "failed to record delivery outcome"
                );
                BranchResult::Aborted {
                    error: err.to_string(),
                }
            }
        };

        BranchReport {
            subscription_id: subscription_id.to_string(),
            delivery_id: Some(delivery_id.to_string()),
            result,
        }
    }
}
