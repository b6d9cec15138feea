use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{Agent, AgentStatus, SyncStatus};

use super::{require_affected, Store, StoreError};

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: i64,
    api_key_hash: String,
    hostname: String,
    status: String,
    sync_status: String,
    busy: bool,
    current_task_id: Option<Uuid>,
    binary_version: String,
    schedule_window: Option<serde_json::Value>,
    last_heartbeat: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AgentRow> for Agent {
    fn from(r: AgentRow) -> Self {
        Agent {
            id: r.id,
            api_key_hash: r.api_key_hash,
            hostname: r.hostname,
            status: parse_status(&r.status),
            sync_status: parse_sync_status(&r.sync_status),
            busy: r.busy,
            current_task_id: r.current_task_id,
            binary_version: r.binary_version,
            schedule_window: r.schedule_window,
            last_heartbeat: r.last_heartbeat,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn status_str(s: AgentStatus) -> &'static str {
    match s {
        AgentStatus::Pending => "pending",
        AgentStatus::Active => "active",
        AgentStatus::Inactive => "inactive",
        AgentStatus::Disabled => "disabled",
        AgentStatus::Error => "error",
    }
}

fn parse_status(s: &str) -> AgentStatus {
    match s {
        "active" => AgentStatus::Active,
        "inactive" => AgentStatus::Inactive,
        "disabled" => AgentStatus::Disabled,
        "error" => AgentStatus::Error,
        _ => AgentStatus::Pending,
    }
}

fn sync_status_str(s: SyncStatus) -> &'static str {
    match s {
        SyncStatus::Pending => "pending",
        SyncStatus::InProgress => "in_progress",
        SyncStatus::Completed => "completed",
        SyncStatus::Failed => "failed",
    }
}

fn parse_sync_status(s: &str) -> SyncStatus {
    match s {
        "in_progress" => SyncStatus::InProgress,
        "completed" => SyncStatus::Completed,
        "failed" => SyncStatus::Failed,
        _ => SyncStatus::Pending,
    }
}

impl Store {
    /// Registers an agent from a claim-voucher redemption. Caller has
    /// already validated and consumed the voucher in the same transaction.
    pub async fn create_agent(&self, tx: &mut super::Tx<'_>, api_key_hash: &str, hostname: &str) -> Result<Agent, StoreError> {
        let row: AgentRow = sqlx::query_as(
            "INSERT INTO agents (api_key_hash, hostname) VALUES ($1, $2) RETURNING *",
        )
        .bind(api_key_hash)
        .bind(hostname)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into())
    }

    pub async fn get_agent(&self, id: i64) -> Result<Agent, StoreError> {
        let row: AgentRow = sqlx::query_as("SELECT * FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }

    /// Authenticate by the `(X-API-Key, X-Agent-ID)` header pair. Returns
    /// `NotFound` on any mismatch so callers can uniformly reject with 401
    /// without distinguishing "no such agent" from "wrong key" (§4.2).
    pub async fn authenticate_agent(&self, agent_id: i64, api_key_hash: &str) -> Result<Agent, StoreError> {
        let agent = self.get_agent(agent_id).await?;
        if agent.api_key_hash != api_key_hash {
            return Err(StoreError::NotFound);
        }
        Ok(agent)
    }

    pub async fn set_agent_status(&self, id: i64, from: AgentStatus, to: AgentStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE agents SET status = $1, updated_at = now() WHERE id = $2 AND status = $3",
        )
        .bind(status_str(to))
        .bind(id)
        .bind(status_str(from))
        .execute(self.pool())
        .await?;
        require_affected(result.rows_affected())
    }

    pub async fn set_sync_status(&self, id: i64, status: SyncStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE agents SET sync_status = $1, updated_at = now() WHERE id = $2")
            .bind(sync_status_str(status))
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Recorded on every successful pong (§4.2 heartbeat).
    pub async fn record_heartbeat(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE agents SET last_heartbeat = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Clear `busy`/`current_task_id` when a session closes or a task
    /// terminates, regardless of current value (used by C8 recovery).
    pub async fn clear_busy(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE agents SET busy = FALSE, current_task_id = NULL, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Candidate agents for dispatch (§4.6 step 1): active, synced, idle.
    pub async fn list_dispatch_candidates(&self) -> Result<Vec<Agent>, StoreError> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT * FROM agents WHERE status = 'active' AND sync_status = 'completed' AND busy = FALSE \
             ORDER BY last_heartbeat DESC NULLS LAST",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Active agents whose heartbeat has gone stale, used by C8 recovery to
    /// find connections the gateway never got a clean disconnect for.
    pub async fn list_stale_agents(&self, older_than_secs: i64) -> Result<Vec<Agent>, StoreError> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT * FROM agents WHERE status = 'active' \
             AND (last_heartbeat IS NULL OR last_heartbeat < now() - make_interval(secs => $1)) \
             ORDER BY last_heartbeat ASC NULLS FIRST",
        )
        .bind(older_than_secs as f64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
