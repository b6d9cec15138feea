//! Preset jobs and job executions (§4.5): the operator surface for defining
//! reusable attack configurations and launching them against a hashlist.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use kh_api_types::{CreateJobExecutionRequest, CreatePresetRequest, JobExecutionQuery};
use kh_core::types::{AttackMode, IncrementMode, JobExecution, JobExecutionStatus, PresetJob};

use super::state::ApiState;
use crate::api_error::ApiError;

fn attack_mode_from_i32(v: i32) -> AttackMode {
    match v {
        1 => AttackMode::Combinator,
        3 => AttackMode::Mask,
        6 => AttackMode::HybridDictMask,
        7 => AttackMode::HybridMaskDict,
        9 => AttackMode::Association,
        _ => AttackMode::Dictionary,
    }
}

fn parse_job_status(s: &str) -> Option<JobExecutionStatus> {
    use JobExecutionStatus::*;
    Some(match s {
        "pending" => Pending,
        "running" => Running,
        "paused" => Paused,
        "processing" => Processing,
        "completed" => Completed,
        "failed" => Failed,
        "cancelled" => Cancelled,
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Preset jobs
// ---------------------------------------------------------------------------

/// GET /api/presets -- list all preset job configurations.
pub(crate) async fn list_presets(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<PresetJob>>, ApiError> {
    let presets = state
        .store
        .list_presets()
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(presets))
}

/// GET /api/presets/{id} -- fetch one preset job.
pub(crate) async fn get_preset(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PresetJob>, ApiError> {
    let preset = state
        .store
        .get_preset(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("preset {id} not found")))?;
    Ok(Json(preset))
}

/// POST /api/presets -- define a new attack preset.
pub(crate) async fn create_preset(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreatePresetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut preset = PresetJob::new(body.name, attack_mode_from_i32(body.attack_mode));
    preset.wordlists = body.wordlists;
    preset.rules = body.rules;
    preset.mask = body.mask;
    preset.increment_min = body.increment_min;
    preset.increment_max = body.increment_max;
    if body.increment_min.is_some() || body.increment_max.is_some() {
        preset.increment_mode = IncrementMode::Increment;
    }
    preset.use_rule_splitting = body.use_rule_splitting;
    preset.multiplication_factor = body.multiplication_factor;
    preset.max_agents = body.max_agents;
    preset.priority = body.priority;

    let created = state
        .store
        .create_preset(&preset)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(created))
}

// ---------------------------------------------------------------------------
// Job executions
// ---------------------------------------------------------------------------

/// GET /api/jobs -- list job executions, optionally filtered by status.
pub(crate) async fn list_job_executions(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<JobExecutionQuery>,
) -> Result<Json<Vec<JobExecution>>, ApiError> {
    let status = query.status.as_deref().and_then(parse_job_status);
    let mut jobs = state
        .store
        .list_job_executions(status)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    let pagination = query.pagination;
    jobs = jobs
        .into_iter()
        .skip(pagination.offset())
        .take(pagination.limit())
        .collect();
    Ok(Json(jobs))
}

/// GET /api/jobs/{id} -- fetch one job execution.
pub(crate) async fn get_job_execution(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobExecution>, ApiError> {
    let job = state
        .store
        .get_job_execution(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("job execution {id} not found")))?;
    Ok(Json(job))
}

/// GET /api/jobs/{id}/tasks -- read-only view of a job's dispatched task slices.
pub(crate) async fn list_job_tasks(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .store
        .list_tasks_for_job(id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(tasks))
}

/// POST /api/jobs -- launch a preset against a hashlist. The keyspace is
/// seeded from the preset's last known value; the planner (C5) refines it
/// with a forced benchmark on first dispatch if it isn't yet accurate.
pub(crate) async fn create_job_execution(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateJobExecutionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let preset = state
        .store
        .get_preset(body.preset_job_id)
        .await
        .map_err(|_| ApiError::BadRequest(format!("preset {} not found", body.preset_job_id)))?;
    let _hashlist = state
        .store
        .get_hashlist(body.hashlist_id)
        .await
        .map_err(|_| ApiError::BadRequest(format!("hashlist {} not found", body.hashlist_id)))?;

    let base_keyspace = preset.effective_keyspace.unwrap_or(0);
    let job = JobExecution::new(preset.id, body.hashlist_id, base_keyspace, preset.max_agents, preset.priority);

    let mut tx = state.store.begin().await.map_err(|e| ApiError::InternalError(e.to_string()))?;
    let created = state
        .store
        .create_job_execution(&mut tx, &job)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok(Json(created))
}

/// POST /api/jobs/{id}/cancel -- operator-initiated cancellation. Any
/// non-terminal status may transition to `cancelled` (§4.5 scenario: stop
/// propagates to every dispatched task via `stop_id`).
pub(crate) async fn cancel_job_execution(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .store
        .get_job_execution(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("job execution {id} not found")))?;
    if job.status.is_terminal() {
        return Err(ApiError::BadRequest("job execution already in a terminal state".into()));
    }
    state
        .store
        .set_job_status(id, job.status, JobExecutionStatus::Cancelled)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let stop_id = Uuid::new_v4();
    state
        .store
        .cancel_job_tasks(id, stop_id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let job = state.store.get_job_execution(id).await.map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(job))
}
