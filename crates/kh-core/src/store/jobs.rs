use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{JobExecution, JobExecutionStatus, JobIncrementLayer};

use super::{require_affected, Store, StoreError};

#[derive(sqlx::FromRow)]
struct JobExecutionRow {
    id: Uuid,
    preset_job_id: Uuid,
    hashlist_id: Uuid,
    status: String,
    base_keyspace: i64,
    effective_keyspace: i64,
    is_accurate_keyspace: bool,
    dispatched_keyspace: i64,
    processed_keyspace: i64,
    priority: i32,
    max_agents: i32,
    interrupted_by: Option<Uuid>,
    failure_count: i32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn status_str(s: JobExecutionStatus) -> &'static str {
    use JobExecutionStatus::*;
    match s {
        Pending => "pending",
        Running => "running",
        Paused => "paused",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> JobExecutionStatus {
    use JobExecutionStatus::*;
    match s {
        "running" => Running,
        "paused" => Paused,
        "processing" => Processing,
        "completed" => Completed,
        "failed" => Failed,
        "cancelled" => Cancelled,
        _ => Pending,
    }
}

impl From<JobExecutionRow> for JobExecution {
    fn from(r: JobExecutionRow) -> Self {
        JobExecution {
            id: r.id,
            preset_job_id: r.preset_job_id,
            hashlist_id: r.hashlist_id,
            status: parse_status(&r.status),
            base_keyspace: r.base_keyspace,
            effective_keyspace: r.effective_keyspace,
            is_accurate_keyspace: r.is_accurate_keyspace,
            dispatched_keyspace: r.dispatched_keyspace,
            processed_keyspace: r.processed_keyspace,
            priority: r.priority,
            max_agents: r.max_agents,
            interrupted_by: r.interrupted_by,
            failure_count: r.failure_count,
            error_message: r.error_message,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LayerRow {
    id: Uuid,
    job_execution_id: Uuid,
    layer_index: i32,
    mask_length: i32,
    status: String,
    base_keyspace: i64,
    effective_keyspace: i64,
    dispatched_keyspace: i64,
    processed_keyspace: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<LayerRow> for JobIncrementLayer {
    fn from(r: LayerRow) -> Self {
        JobIncrementLayer {
            id: r.id,
            job_execution_id: r.job_execution_id,
            layer_index: r.layer_index,
            mask_length: r.mask_length,
            status: parse_status(&r.status),
            base_keyspace: r.base_keyspace,
            effective_keyspace: r.effective_keyspace,
            dispatched_keyspace: r.dispatched_keyspace,
            processed_keyspace: r.processed_keyspace,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl Store {
    pub async fn create_job_execution(&self, tx: &mut super::Tx<'_>, job: &JobExecution) -> Result<JobExecution, StoreError> {
        let row: JobExecutionRow = sqlx::query_as(
            "INSERT INTO job_executions (id, preset_job_id, hashlist_id, status, base_keyspace, effective_keyspace, \
             is_accurate_keyspace, priority, max_agents) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) RETURNING *",
        )
        .bind(job.id)
        .bind(job.preset_job_id)
        .bind(job.hashlist_id)
        .bind(status_str(job.status))
        .bind(job.base_keyspace)
        .bind(job.effective_keyspace)
        .bind(job.is_accurate_keyspace)
        .bind(job.priority)
        .bind(job.max_agents)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into())
    }

    pub async fn get_job_execution(&self, id: Uuid) -> Result<JobExecution, StoreError> {
        let row: JobExecutionRow = sqlx::query_as("SELECT * FROM job_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }

    /// Row-level locked read used by the planner before allocating a slice
    /// (§4.5 step 5: "row-level lock on the parent" prevents overlapping
    /// allocation between concurrent planners).
    pub async fn lock_job_execution_for_allocation(&self, tx: &mut super::Tx<'_>, id: Uuid) -> Result<JobExecution, StoreError> {
        let row: JobExecutionRow = sqlx::query_as("SELECT * FROM job_executions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }

    pub async fn bump_dispatched_keyspace(&self, tx: &mut super::Tx<'_>, id: Uuid, additional: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE job_executions SET dispatched_keyspace = dispatched_keyspace + $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(additional)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_job_status(&self, id: Uuid, from: JobExecutionStatus, to: JobExecutionStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE job_executions SET status = $1, updated_at = now() WHERE id = $2 AND status = $3")
            .bind(status_str(to))
            .bind(id)
            .bind(status_str(from))
            .execute(self.pool())
            .await?;
        require_affected(result.rows_affected())
    }

    /// Derived rollup, never authoritative on the wire (§4.7). Recomputes
    /// dispatched/processed from the task table.
    pub async fn recompute_rollup(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE job_executions SET \
                dispatched_keyspace = COALESCE((SELECT sum(keyspace_end - keyspace_start) FROM job_tasks WHERE job_execution_id = $1 AND status <> 'pending'), 0), \
                processed_keyspace = COALESCE((SELECT sum(keyspace_processed) FROM job_tasks WHERE job_execution_id = $1), 0), \
                updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn increment_failure_count(&self, id: Uuid, error_message: &str) -> Result<i32, StoreError> {
        let count: i32 = sqlx::query_scalar(
            "UPDATE job_executions SET failure_count = failure_count + 1, \
                error_message = COALESCE(error_message, $2), updated_at = now() \
             WHERE id = $1 RETURNING failure_count",
        )
        .bind(id)
        .bind(error_message)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// Ready-for-scheduling jobs ordered by (priority desc, created_at asc)
    /// per §4.6 step 2.
    pub async fn list_ready_job_executions(&self) -> Result<Vec<JobExecution>, StoreError> {
        let rows: Vec<JobExecutionRow> = sqlx::query_as(
            "SELECT * FROM job_executions WHERE status IN ('pending', 'running') ORDER BY priority DESC, created_at ASC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Operator listing view, newest first, optionally filtered to one status.
    pub async fn list_job_executions(&self, status: Option<JobExecutionStatus>) -> Result<Vec<JobExecution>, StoreError> {
        let rows: Vec<JobExecutionRow> = match status {
            Some(s) => {
                sqlx::query_as("SELECT * FROM job_executions WHERE status = $1 ORDER BY created_at DESC")
                    .bind(status_str(s))
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM job_executions ORDER BY created_at DESC")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn create_increment_layer(&self, layer: &JobIncrementLayer) -> Result<JobIncrementLayer, StoreError> {
        let row: LayerRow = sqlx::query_as(
            "INSERT INTO job_increment_layers (id, job_execution_id, layer_index, mask_length, status, base_keyspace, effective_keyspace) \
             VALUES ($1,$2,$3,$4,$5,$6,$7) RETURNING *",
        )
        .bind(layer.id)
        .bind(layer.job_execution_id)
        .bind(layer.layer_index)
        .bind(layer.mask_length)
        .bind(status_str(layer.status))
        .bind(layer.base_keyspace)
        .bind(layer.effective_keyspace)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    /// Layers run in order: one fully completes before the next becomes
    /// eligible (§4.5 step 2, scenario 6).
    pub async fn list_layers(&self, job_execution_id: Uuid) -> Result<Vec<JobIncrementLayer>, StoreError> {
        let rows: Vec<LayerRow> = sqlx::query_as(
            "SELECT * FROM job_increment_layers WHERE job_execution_id = $1 ORDER BY layer_index ASC",
        )
        .bind(job_execution_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Mirrors `bump_dispatched_keyspace` at the layer granularity for
    /// increment-mode jobs (the planner's row lock on the parent job
    /// execution covers this too, since layers never allocate concurrently
    /// with each other — only one is active at a time).
    pub async fn bump_layer_dispatched(&self, tx: &mut super::Tx<'_>, layer_id: Uuid, additional: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE job_increment_layers SET dispatched_keyspace = dispatched_keyspace + $2, updated_at = now() WHERE id = $1")
            .bind(layer_id)
            .bind(additional)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_layer_status(&self, id: Uuid, from: JobExecutionStatus, to: JobExecutionStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE job_increment_layers SET status = $1, updated_at = now() WHERE id = $2 AND status = $3")
            .bind(status_str(to))
            .bind(id)
            .bind(status_str(from))
            .execute(self.pool())
            .await?;
        require_affected(result.rows_affected())
    }
}
