//! Per-branch results of a publish or a retry sweep.
//!
//! Every delivery branch ends in a [`BranchReport`] instead of an error, so a
//! failing subscriber or store is visible in the logs without ever reaching
//! the caller.

use chrono::{DateTime, Utc};
use hooks_core::policy::Transition;
use hooks_core::types::DeliveryStatus;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum BranchResult {
    Delivered,
    Retrying { next_retry_at: DateTime<Utc> },
    Failed { reason: String },
    /// The row was already terminal when the outcome was written.
    Stale,
    /// Bookkeeping failed; the delivery state may lag behind the attempt.
    Aborted { error: String },
}

impl BranchResult {
    pub fn from_transition(transition: &Transition) -> Self {
        match (transition.status, transition.next_retry_at) {
            (DeliveryStatus::Success, _) => BranchResult::Delivered,
            (DeliveryStatus::Retrying, Some(next_retry_at)) => {
                BranchResult::Retrying { next_retry_at }
            }
            _ => BranchResult::Failed {
                reason: transition
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "delivery failed".to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchReport {
    pub subscription_id: String,
    pub delivery_id: Option<String>,
    pub result: BranchResult,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub reports: Vec<BranchReport>,
}

impl RunSummary {
    pub fn count(&self, matches: impl Fn(&BranchResult) -> bool) -> usize {
        self.reports.iter().filter(|r| matches(&r.result)).count()
    }

    pub fn delivered(&self) -> usize {
        self.count(|r| matches!(r, BranchResult::Delivered))
    }

    pub fn retrying(&self) -> usize {
        self.count(|r| matches!(r, BranchResult::Retrying { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, BranchResult::Failed { .. }))
    }

    pub fn aborted(&self) -> usize {
        self.count(|r| matches!(r, BranchResult::Aborted { .. }))
    }

    pub fn report_for(&self, subscription_id: &str) -> Option<&BranchReport> {
        self.reports
            .iter()
            .find(|r| r.subscription_id == subscription_id)
    }

    pub fn log(&self, scope: &str, event_type: Option<&str>) {
        for report in &self.reports {
            if let BranchResult::Aborted { error } = &report.result {
                warn!(
                    scope,
                    subscription_id = %report.subscription_id,
                    delivery_id = ?report.delivery_id,
                    error = %error,
                    "delivery bookkeeping failed"
                );
            }
        }
        info!(
            scope,
            event_type,
            total = self.reports.len(),
            delivered = self.delivered(),
            retrying = self.retrying(),
            failed = self.failed(),
            aborted = self.aborted(),
            "delivery run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(status: DeliveryStatus, next_retry_at: Option<DateTime<Utc>>) -> Transition {
        Transition {
            attempt: 1,
            status,
            next_retry_at,
            response_status: None,
            response_body: None,
            response_time_ms: None,
            error_message: Some("HTTP 500".to_string()),
            delivered_at: None,
        }
    }

    #[test]
    fn test_branch_result_from_transition() {
        let at = Utc::now();
        assert_eq!(
            BranchResult::from_transition(&transition(DeliveryStatus::Success, None)),
            BranchResult::Delivered
        );
        assert_eq!(
            BranchResult::from_transition(&transition(DeliveryStatus::Retrying, Some(at))),
            BranchResult::Retrying { next_retry_at: at }
        );
        assert_eq!(
            BranchResult::from_transition(&transition(DeliveryStatus::Failed, None)),
            BranchResult::Failed {
                reason: "HTTP 500".to_string()
            }
        );
    }

    #[test]
    fn test_summary_counts() {
        let report = |id: &str, result| BranchReport {
            subscription_id: id.to_string(),
            delivery_id: None,
            result,
        };
        let summary = RunSummary {
            reports: vec![
                report("a", BranchResult::Delivered),
                report("b", BranchResult::Delivered),
                report("c", BranchResult::Aborted { error: "db".to_string() }),
            ],
        };

        assert_eq!(summary.delivered(), 2);
        assert_eq!(summary.aborted(), 1);
        assert_eq!(summary.failed(), 0);
        assert_eq!(summary.report_for("c").unwrap().subscription_id, "c");
    }
}
