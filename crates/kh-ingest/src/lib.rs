//! Progress & Crack Ingestor (C7): drains the forwarding channel
//! `kh-bridge`'s WebSocket reader feeds agent progress/crack-batch frames
//! into, and turns them into store writes plus admin event-bus fan-out.
//!
//! Runs as its own worker task in the daemon, independent from the HTTP/WS
//! layer, so a slow Postgres write never backpressures an agent's socket
//! read loop.

use uuid::Uuid;

use kh_bridge::event_bus::EventBus;
use kh_bridge::gateway::GatewayRegistry;
use kh_bridge::ingest::{IngestEvent, IngestReceiver};
use kh_bridge::protocol::BridgeEvent;
use kh_core::config::RecoveryConfig;
use kh_core::store::{Store, StoreError};
use kh_core::types::JobExecutionStatus;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ProgressIngestor {
    store: Store,
    event_bus: EventBus,
    config: RecoveryConfig,
    // Kept for symmetry with the other C6/C8 components that dispatch over
    // the same registry; unused today but this is where a future outbound
    // ack (e.g. confirming a crack batch) would be sent from.
    #[allow(dead_code)]
    gateway: GatewayRegistry,
}

impl ProgressIngestor {
    pub fn new(store: Store, gateway: GatewayRegistry, event_bus: EventBus, config: RecoveryConfig) -> Self {
        Self { store, event_bus, config, gateway }
    }

    /// Drain `rx` until the channel closes (every sender dropped, i.e. the
    /// gateway shut down) or `shutdown` fires.
    pub async fn run(self, mut rx: IngestReceiver, shutdown: kh_harness::shutdown::ShutdownSignal) {
        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.handle(event).await {
                                error!(error = %e, "ingest event handling failed");
                            }
                        }
                        None => {
                            info!("ingest channel closed, stopping");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("ingest worker shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&self, event: IngestEvent) -> Result<(), IngestError> {
        match event {
            IngestEvent::JobStatus { task_id, status, keyspace_processed, progress_percent, hash_rate, detected_crack_count, .. } => {
                self.store.apply_progress(task_id, keyspace_processed, progress_percent, hash_rate, detected_crack_count).await?;
                self.event_bus.publish(BridgeEvent::TaskProgress { task_id, progress_percent: progress_percent as f64 });

                match status.as_str() {
                    "completed" => {
                        self.store.mark_cracking_complete(task_id, detected_crack_count).await?;
                        self.try_complete_task(task_id).await?;
                    }
                    "failed" => self.fail_task(task_id).await?,
                    _ => {}
                }
            }
            IngestEvent::CrackBatch { task_id, batch_number, cracks, .. } => {
                let mut tx = self.store.begin().await?;
                let fresh = self.store.record_batch_seen(&mut tx, task_id, batch_number).await?;
                if !fresh {
                    tx.commit().await?;
                    return Ok(());
                }
                let task = self.store.get_task(task_id).await?;
                let job = self.store.get_job_execution(task.job_execution_id).await?;

                let mut cracked_values = Vec::new();
                for crack in &cracks {
                    match self.apply_crack(job.hashlist_id, task_id, crack).await {
                        Ok(true) => cracked_values.push(crack.hash_value.clone()),
                        Ok(false) => {}
                        Err(e) => warn!(task_id = %task_id, error = %e, "failed to apply cracked hash"),
                    }
                }
                self.store.increment_received_crack_count(&mut tx, task_id, cracks.len() as i32).await?;
                tx.commit().await?;

                self.store.refresh_cracked_count(job.hashlist_id).await?;
                for hash_value in cracked_values {
                    self.event_bus.publish(BridgeEvent::HashCracked { hashlist_id: job.hashlist_id, hash_value });
                }
                self.try_complete_task(task_id).await?;
            }
            IngestEvent::BatchesComplete { task_id, .. } => {
                self.store.mark_batches_complete(task_id).await?;
                self.try_complete_task(task_id).await?;
            }
        }
        Ok(())
    }

    /// Applies one cracked hash, resolving LM-half pairing before flipping
    /// the hash's `is_cracked` flag. Returns whether this call was the one
    /// that made the hash cracked (so the caller only publishes once).
    async fn apply_crack(
        &self,
        hashlist_id: Uuid,
        task_id: Uuid,
        crack: &kh_bridge::protocol::CrackedHash,
    ) -> Result<bool, IngestError> {
        let hash = self.store.find_by_hash_value(hashlist_id, &crack.hash_value).await?;

        if let Some(half_index) = crack.lm_half_index {
            self.store.mark_lm_half_cracked(hash.id, half_index, &crack.plaintext).await?;
            let Some((first, second)) = self.store.lm_pair_complete(hash.id).await? else {
                return Ok(false);
            };
            return self.store.mark_cracked(hash.id, &format!("{first}{second}"), task_id).await.map_err(Into::into);
        }

        self.store.mark_cracked(hash.id, &crack.plaintext, task_id).await.map_err(Into::into)
    }

    async fn try_complete_task(&self, task_id: Uuid) -> Result<(), IngestError> {
        let task = self.store.get_task(task_id).await?;
        if task.status != kh_core::types::JobTaskStatus::Processing || !task.crack_accounting_complete() {
            return Ok(());
        }
        self.store.complete_task(task_id).await?;
        self.store.recompute_rollup(task.job_execution_id).await?;
        self.maybe_complete_job(task.job_execution_id).await?;
        Ok(())
    }

    async fn fail_task(&self, task_id: Uuid) -> Result<(), IngestError> {
        let task = self.store.get_task(task_id).await?;
        self.store.fail_task(task_id).await?;
        let failures = self.store.increment_failure_count(task.job_execution_id, "agent reported task failure").await?;
        if failures >= self.config.job_failure_threshold as i32 {
            let _ = self.store.set_job_status(task.job_execution_id, JobExecutionStatus::Running, JobExecutionStatus::Failed).await;
            self.event_bus.publish(BridgeEvent::JobStatusChanged { job_execution_id: task.job_execution_id, status: JobExecutionStatus::Failed });
        }
        Ok(())
    }

    /// A job is done once every task under it has reached a terminal state
    /// and the full keyspace has been dispatched. Checked after every task
    /// completion rather than tracked incrementally, since task counts are
    /// small enough per job that a full rescan is cheap.
    async fn maybe_complete_job(&self, job_execution_id: Uuid) -> Result<(), IngestError> {
        let job = self.store.get_job_execution(job_execution_id).await?;
        if job.dispatched_keyspace < job.effective_keyspace {
            return Ok(());
        }
        let tasks = self.store.list_tasks_for_job(job_execution_id).await?;
        if tasks.is_empty() || !tasks.iter().all(|t| t.status.is_terminal()) {
            return Ok(());
        }
        if tasks.iter().any(|t| t.status == kh_core::types::JobTaskStatus::Failed) {
            let _ = self.store.set_job_status(job_execution_id, JobExecutionStatus::Running, JobExecutionStatus::Failed).await;
            self.event_bus.publish(BridgeEvent::JobStatusChanged { job_execution_id, status: JobExecutionStatus::Failed });
            return Ok(());
        }
        if self.store.set_job_status(job_execution_id, JobExecutionStatus::Running, JobExecutionStatus::Completed).await.is_ok() {
            self.event_bus.publish(BridgeEvent::JobStatusChanged { job_execution_id, status: JobExecutionStatus::Completed });
        }
        Ok(())
    }
}
