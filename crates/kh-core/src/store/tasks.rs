use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{JobTask, JobTaskStatus};

use super::{require_affected, Store, StoreError};

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    job_execution_id: Uuid,
    layer_id: Option<Uuid>,
    agent_id: Option<i64>,
    status: String,
    keyspace_start: i64,
    keyspace_end: i64,
    effective_keyspace: i64,
    keyspace_processed: i64,
    progress_percent: f32,
    hash_rate: i64,
    detected_crack_count: i32,
    expected_crack_count: Option<i32>,
    received_crack_count: i32,
    batches_complete_signaled: bool,
    retransmit_count: i32,
    is_keyspace_split: bool,
    binary_version_id: Option<Uuid>,
    cracking_completed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    stop_id: Option<Uuid>,
    reconnect_deadline: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn status_str(s: JobTaskStatus) -> &'static str {
    use JobTaskStatus::*;
    match s {
        Pending => "pending",
        Assigned => "assigned",
        ReconnectPending => "reconnect_pending",
        Running => "running",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> JobTaskStatus {
    use JobTaskStatus::*;
    match s {
        "assigned" => Assigned,
        "reconnect_pending" => ReconnectPending,
        "running" => Running,
        "processing" => Processing,
        "completed" => Completed,
        "failed" => Failed,
        "cancelled" => Cancelled,
        _ => Pending,
    }
}

impl From<TaskRow> for JobTask {
    fn from(r: TaskRow) -> Self {
        JobTask {
            id: r.id,
            job_execution_id: r.job_execution_id,
            layer_id: r.layer_id,
            agent_id: r.agent_id,
            status: parse_status(&r.status),
            keyspace_start: r.keyspace_start,
            keyspace_end: r.keyspace_end,
            effective_keyspace: r.effective_keyspace,
            keyspace_processed: r.keyspace_processed,
            progress_percent: r.progress_percent,
            hash_rate: r.hash_rate,
            detected_crack_count: r.detected_crack_count,
            expected_crack_count: r.expected_crack_count,
            received_crack_count: r.received_crack_count,
            batches_complete_signaled: r.batches_complete_signaled,
            retransmit_count: r.retransmit_count,
            is_keyspace_split: r.is_keyspace_split,
            binary_version_id: r.binary_version_id,
            cracking_completed_at: r.cracking_completed_at,
            completed_at: r.completed_at,
            stop_id: r.stop_id,
            reconnect_deadline: r.reconnect_deadline,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl Store {
    /// Task creation is transactional (§4.5 step 5): the caller holds the
    /// job-execution row lock (see `lock_job_execution_for_allocation`)
    /// across both the slice allocation and this insert.
    pub async fn create_task(&self, tx: &mut super::Tx<'_>, task: &JobTask) -> Result<JobTask, StoreError> {
        let row: TaskRow = sqlx::query_as(
            "INSERT INTO job_tasks (id, job_execution_id, layer_id, status, keyspace_start, keyspace_end, \
             effective_keyspace, is_keyspace_split) VALUES ($1,$2,$3,$4,$5,$6,$7,$8) RETURNING *",
        )
        .bind(task.id)
        .bind(task.job_execution_id)
        .bind(task.layer_id)
        .bind(status_str(task.status))
        .bind(task.keyspace_start)
        .bind(task.keyspace_end)
        .bind(task.effective_keyspace)
        .bind(task.is_keyspace_split)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<JobTask, StoreError> {
        let row: TaskRow = sqlx::query_as("SELECT * FROM job_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }

    /// Candidate pending tasks, newest-first within a job (§4.6 step 2),
    /// using `SKIP LOCKED` so two scheduler instances never contend on the
    /// same row.
    pub async fn claim_candidate_task(&self, tx: &mut super::Tx<'_>, job_execution_id: Uuid) -> Result<Option<JobTask>, StoreError> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT * FROM job_tasks WHERE job_execution_id = $1 AND status = 'pending' \
             ORDER BY created_at DESC FOR UPDATE SKIP LOCKED LIMIT 1",
        )
        .bind(job_execution_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Two-step assignment transaction (§4.6 step 5). Both constrained
    /// updates must affect exactly one row; if either doesn't, the caller
    /// rolls back and tries the next pair.
    pub async fn assign_task(&self, tx: &mut super::Tx<'_>, task_id: Uuid, agent_id: i64) -> Result<(), StoreError> {
        let task_updated = sqlx::query("UPDATE job_tasks SET status = 'assigned', agent_id = $2, updated_at = now() WHERE id = $1 AND status = 'pending'")
            .bind(task_id)
            .bind(agent_id)
            .execute(&mut **tx)
            .await?;
        require_affected(task_updated.rows_affected())?;

        let agent_updated = sqlx::query("UPDATE agents SET busy = TRUE, current_task_id = $2, updated_at = now() WHERE id = $1 AND busy = FALSE")
            .bind(agent_id)
            .bind(task_id)
            .execute(&mut **tx)
            .await?;
        require_affected(agent_updated.rows_affected())
    }

    /// Revert on send-buffer-full (§4.6 step 6).
    pub async fn revert_assignment(&self, task_id: Uuid, agent_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE job_tasks SET status = 'pending', agent_id = NULL, updated_at = now() WHERE id = $1 AND status = 'assigned'")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE agents SET busy = FALSE, current_task_id = NULL, updated_at = now() WHERE id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Progress is monotonic per task (§4.7): a lower `keyspace_processed`
    /// is silently discarded as late via the `WHERE` guard.
    pub async fn apply_progress(
        &self,
        task_id: Uuid,
        keyspace_processed: i64,
        progress_percent: f32,
        hash_rate: i64,
        detected_crack_count: i32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE job_tasks SET keyspace_processed = $2, progress_percent = $3, hash_rate = $4, \
             detected_crack_count = $5, status = CASE WHEN status = 'assigned' THEN 'running' ELSE status END, \
             updated_at = now() WHERE id = $1 AND keyspace_processed <= $2",
        )
        .bind(task_id)
        .bind(keyspace_processed)
        .bind(progress_percent)
        .bind(hash_rate)
        .bind(detected_crack_count)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Agent reported completed/failed: stamp `cracking_completed_at` and
    /// move to `processing` pending final crack-count reconciliation.
    pub async fn mark_cracking_complete(&self, task_id: Uuid, expected_crack_count: i32) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE job_tasks SET status = 'processing', cracking_completed_at = now(), \
             expected_crack_count = $2, updated_at = now() WHERE id = $1 AND status IN ('running', 'assigned')",
        )
        .bind(task_id)
        .bind(expected_crack_count)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Batch-number dedup (§4.7 step 3): returns `false` if this batch was
    /// already seen, in which case the caller must not double-count.
    pub async fn record_batch_seen(&self, tx: &mut super::Tx<'_>, task_id: Uuid, batch_number: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT INTO crack_batch_seen (task_id, batch_number) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(task_id)
            .bind(batch_number)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn increment_received_crack_count(&self, tx: &mut super::Tx<'_>, task_id: Uuid, by: i32) -> Result<(), StoreError> {
        sqlx::query("UPDATE job_tasks SET received_crack_count = received_crack_count + $2, updated_at = now() WHERE id = $1")
            .bind(task_id)
            .bind(by)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn mark_batches_complete(&self, task_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE job_tasks SET batches_complete_signaled = TRUE, updated_at = now() WHERE id = $1")
            .bind(task_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Finalizes a task once `crack_accounting_complete()` holds, or a
    /// processing-timeout elapsed (§4.7, design-notes ambiguity (b)).
    pub async fn complete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE job_tasks SET status = 'completed', completed_at = now(), updated_at = now() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(task_id)
        .execute(self.pool())
        .await?;
        require_affected(result.rows_affected())?;
        let row: TaskRow = sqlx::query_as("SELECT * FROM job_tasks WHERE id = $1").bind(task_id).fetch_one(self.pool()).await?;
        self.clear_busy_if_current(row.agent_id, task_id).await
    }

    /// Task failure releases the keyspace slice and clears the agent's busy
    /// bit (§4.8 terminal task rules); caller bumps job failure count.
    pub async fn fail_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        let row: TaskRow = sqlx::query_as("SELECT * FROM job_tasks WHERE id = $1").bind(task_id).fetch_one(self.pool()).await?;
        sqlx::query("UPDATE job_tasks SET status = 'failed', updated_at = now() WHERE id = $1")
            .bind(task_id)
            .execute(self.pool())
            .await?;
        self.clear_busy_if_current(row.agent_id, task_id).await
    }

    async fn clear_busy_if_current(&self, agent_id: Option<i64>, task_id: Uuid) -> Result<(), StoreError> {
        if let Some(agent_id) = agent_id {
            sqlx::query("UPDATE agents SET busy = FALSE, current_task_id = NULL, updated_at = now() WHERE id = $1 AND current_task_id = $2")
                .bind(agent_id)
                .bind(task_id)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }

    /// Session close on a running task (§4.8): move to `reconnect_pending`
    /// and start the per-task grace timer.
    pub async fn begin_reconnect_grace(&self, task_id: Uuid, grace_secs: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE job_tasks SET status = 'reconnect_pending', \
             reconnect_deadline = now() + make_interval(secs => $2), updated_at = now() \
             WHERE id = $1 AND status IN ('running', 'assigned', 'processing')",
        )
        .bind(task_id)
        .bind(grace_secs as f64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Reconnect with no running task, or grace expiry: reset to `pending`
    /// for rescheduling, agent cleared.
    pub async fn reset_to_pending(&self, task_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE job_tasks SET status = 'pending', agent_id = NULL, reconnect_deadline = NULL, updated_at = now() \
             WHERE id = $1 AND status = 'reconnect_pending'",
        )
        .bind(task_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Valid reconnect with matching task: resume running.
    pub async fn resume_after_reconnect(&self, task_id: Uuid, keyspace_processed: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE job_tasks SET status = 'running', reconnect_deadline = NULL, \
             keyspace_processed = GREATEST(keyspace_processed, $2), updated_at = now() \
             WHERE id = $1 AND status = 'reconnect_pending'",
        )
        .bind(task_id)
        .bind(keyspace_processed)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Operator/dashboard read-only view of every task under a job.
    pub async fn list_tasks_for_job(&self, job_execution_id: Uuid) -> Result<Vec<JobTask>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM job_tasks WHERE job_execution_id = $1 ORDER BY created_at ASC",
        )
        .bind(job_execution_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Tasks stuck in `processing` past the timeout without both crack
    /// counts reconciling (§4.7, design-notes ambiguity (b): "both, else
    /// timeout"). The recovery controller force-completes these.
    pub async fn list_overdue_processing_tasks(&self, timeout_secs: i64) -> Result<Vec<JobTask>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM job_tasks WHERE status = 'processing' \
             AND cracking_completed_at < now() - make_interval(secs => $1)",
        )
        .bind(timeout_secs as f64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn list_expired_reconnects(&self) -> Result<Vec<JobTask>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM job_tasks WHERE status = 'reconnect_pending' AND reconnect_deadline < now()",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Cancellation (§5): flips non-terminal tasks of a job to `cancelled`
    /// and tags them with `stop_id` for `task_stop_ack` correlation.
    pub async fn cancel_job_tasks(&self, job_execution_id: Uuid, stop_id: Uuid) -> Result<Vec<JobTask>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "UPDATE job_tasks SET status = 'cancelled', stop_id = $2, updated_at = now() \
             WHERE job_execution_id = $1 AND status NOT IN ('completed', 'failed', 'cancelled') RETURNING *",
        )
        .bind(job_execution_id)
        .bind(stop_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn retransmit_count_bump(&self, task_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE job_tasks SET retransmit_count = retransmit_count + 1, updated_at = now() WHERE id = $1")
            .bind(task_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
