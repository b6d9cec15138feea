//! Recovery Controller (C8): a periodic sweep that reclaims tasks and agent
//! slots left behind by connections that dropped without a clean
//! disconnect (crash, network partition, OOM-killed agent process).
//!
//! Modeled on the daemon's patrol loop: a struct owning the configured
//! thresholds plus one async method that runs a single pass and returns a
//! report, called on an interval from the daemon's main loop.

use uuid::Uuid;

use kh_core::config::RecoveryConfig;
use kh_core::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one sweep did, for logging and the admin event stream.
#[derive(Debug, Clone, Default)]
pub struct RecoverySweepReport {
    /// Tasks whose reconnect grace period expired without the agent coming
    /// back; reset to `pending` so another agent can claim them.
    pub reconnects_expired: Vec<Uuid>,
    /// Agents whose heartbeat has gone stale while still marked `active`
    /// and `busy`; their slot is cleared so the scheduler can dispatch past
    /// them instead of treating them as occupied forever.
    pub stale_agents_cleared: Vec<i64>,
    /// Tasks stuck in `processing` past the timeout with crack accounting
    /// never reconciling; force-completed so the job can progress.
    pub tasks_force_completed: Vec<Uuid>,
}

impl RecoverySweepReport {
    pub fn is_empty(&self) -> bool {
        self.reconnects_expired.is_empty() && self.stale_agents_cleared.is_empty() && self.tasks_force_completed.is_empty()
    }
}

pub struct RecoveryController {
    store: Store,
    config: RecoveryConfig,
}

impl RecoveryController {
    pub fn new(store: Store, config: RecoveryConfig) -> Self {
        Self { store, config }
    }

    /// Run one sweep: reclaim expired reconnect grace periods, then clear
    /// any agent slot that's gone quiet for longer than the processing
    /// timeout while nothing reset it through the normal disconnect path.
    pub async fn sweep(&self) -> Result<RecoverySweepReport, RecoveryError> {
        let mut report = RecoverySweepReport::default();

        for task in self.store.list_expired_reconnects().await? {
            self.store.reset_to_pending(task.id).await?;
            if let Some(agent_id) = task.agent_id {
                self.store.clear_busy(agent_id).await?;
            }
            report.reconnects_expired.push(task.id);
        }

        for agent in self.store.list_stale_agents(self.config.task_processing_timeout_secs as i64).await? {
            self.store.clear_busy(agent.id).await?;
            report.stale_agents_cleared.push(agent.id);
        }

        for task in self.store.list_overdue_processing_tasks(self.config.task_processing_timeout_secs as i64).await? {
            if self.store.complete_task(task.id).await.is_ok() {
                self.store.recompute_rollup(task.job_execution_id).await?;
                report.tasks_force_completed.push(task.id);
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_reports_empty() {
        let report = RecoverySweepReport::default();
        assert!(report.is_empty());
    }

    #[test]
    fn populated_report_is_not_empty() {
        let mut report = RecoverySweepReport::default();
        report.stale_agents_cleared.push(1);
        assert!(!report.is_empty());
    }
}
