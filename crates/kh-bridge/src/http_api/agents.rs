//! Agent registry, device inventory, claim vouchers, and benchmark
//! bookkeeping — the operator-facing slice of C2.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use kh_api_types::{ClaimRequest, ClaimResponse, CreateVoucherRequest, DeviceUpdateRequest, PaginationQuery, VoucherResponse};
use kh_core::apikey::{generate_token, hash_token};
use kh_core::types::{Agent, AgentStatus};

use super::state::ApiState;
use crate::api_error::ApiError;

/// GET /api/agents -- list registered agents.
pub(crate) async fn list_agents(
    State(state): State<Arc<ApiState>>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Vec<Agent>>, ApiError> {
    // `list_dispatch_candidates` only returns eligible agents; the full
    // roster lives behind the same store but the operator view wants every
    // agent regardless of eligibility, so page over all statuses here.
    let mut agents = state
        .store
        .list_dispatch_candidates()
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    agents.sort_by_key(|a| a.id);
    let page = agents
        .into_iter()
        .skip(pagination.offset())
        .take(pagination.limit())
        .collect();
    Ok(Json(page))
}

/// GET /api/agents/{id} -- fetch a single agent.
pub(crate) async fn get_agent(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Json<Agent>, ApiError> {
    let agent = state
        .store
        .get_agent(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("agent {id} not found")))?;
    Ok(Json(agent))
}

/// POST /api/agents/{id}/disable -- operator-initiated disable (active -> disabled).
pub(crate) async fn disable_agent(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .set_agent_status(id, AgentStatus::Active, AgentStatus::Disabled)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let agent = state.store.get_agent(id).await.map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(agent))
}

/// POST /api/agents/{id}/enable -- operator-initiated re-enable (disabled -> active).
pub(crate) async fn enable_agent(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .set_agent_status(id, AgentStatus::Disabled, AgentStatus::Active)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let agent = state.store.get_agent(id).await.map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(agent))
}

/// GET /api/agents/{id}/devices -- list an agent's detected physical devices.
pub(crate) async fn list_agent_devices(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let devices = state
        .store
        .list_devices(id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(devices))
}

/// PUT /api/agents/{id}/devices/{device_index} -- enable/disable one device.
///
/// The store only exposes a wholesale `replace_devices`, so this reads the
/// current inventory, flips the one entry, and writes it back.
pub(crate) async fn update_agent_device(
    State(state): State<Arc<ApiState>>,
    Path((id, device_index)): Path<(i64, i32)>,
    Json(body): Json<DeviceUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut devices = state
        .store
        .list_devices(id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    let Some(device) = devices.iter_mut().find(|d| d.device_index == device_index) else {
        return Err(ApiError::NotFound(format!("device {device_index} not found for agent {id}")));
    };
    device.enabled = body.enabled;
    state
        .store
        .replace_devices(id, &devices)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(devices))
}

// ---------------------------------------------------------------------------
// Claim vouchers (§4.2 agent onboarding)
// ---------------------------------------------------------------------------

/// POST /api/vouchers -- mint a single-use claim voucher.
pub(crate) async fn create_voucher(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateVoucherRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = generate_token().map_err(|e| ApiError::InternalError(e.to_string()))?;
    let expires_at = body
        .expires_in_secs
        .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs));
    let voucher = state
        .store
        .create_voucher(&issued.hash, body.hostname_constraint.as_deref(), expires_at)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(VoucherResponse {
        id: voucher.id,
        token: issued.plaintext,
        expires_at: voucher.expires_at,
    }))
}

/// POST /agent/register -- an agent redeems a voucher and receives its
/// credentials (§4.2). Public endpoint: gated by the voucher token, not the
/// operator API key.
pub(crate) async fn register_agent(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<ClaimRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token_hash = hash_token(&body.token);
    let voucher = state
        .store
        .get_voucher_by_hash(&token_hash)
        .await
        .map_err(|_| ApiError::BadRequest("invalid or unknown voucher token".into()))?;

    if !voucher.is_available() {
        return Err(ApiError::BadRequest("voucher already consumed or expired".into()));
    }
    if let Some(required_host) = &voucher.issued_hostname_constraint {
        if required_host != &body.hostname {
            return Err(ApiError::BadRequest("hostname does not match voucher constraint".into()));
        }
    }

    let issued = generate_token().map_err(|e| ApiError::InternalError(e.to_string()))?;

    let mut tx = state.store.begin().await.map_err(|e| ApiError::InternalError(e.to_string()))?;
    let agent = state
        .store
        .create_agent(&mut tx, &issued.hash, &body.hostname)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    state
        .store
        .consume_voucher(&mut tx, voucher.id, agent.id)
        .await
        .map_err(|_| ApiError::BadRequest("voucher was consumed by a concurrent request".into()))?;
    tx.commit().await.map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok(Json(ClaimResponse {
        agent_id: agent.id,
        api_key: issued.plaintext,
    }))
}

// ---------------------------------------------------------------------------
// Benchmarks (§4.6 step 4 gate)
// ---------------------------------------------------------------------------

/// GET /api/agents/{id}/benchmarks/{attack_mode}/{hash_type_id} -- look up a
/// recorded benchmark, if one exists.
pub(crate) async fn get_agent_benchmark(
    State(state): State<Arc<ApiState>>,
    Path((id, attack_mode, hash_type_id)): Path<(i64, i32, i32)>,
) -> Result<impl IntoResponse, ApiError> {
    let mode = attack_mode_from_i32(attack_mode);
    let benchmark = state
        .store
        .get_benchmark(id, mode, hash_type_id, None)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(benchmark))
}

fn attack_mode_from_i32(v: i32) -> kh_core::types::AttackMode {
    use kh_core::types::AttackMode::*;
    match v {
        1 => Combinator,
        3 => Mask,
        6 => HybridDictMask,
        7 => HybridMaskDict,
        9 => Association,
        _ => Dictionary,
    }
}
