//! Hashlist ingest and the agent-facing uncracked-value feed (§5, §6).
//!
//! No hash file is ever written to disk by the server: uploads are parsed
//! and batch-inserted directly into storage, and agents pull a freshly
//! computed text stream of uncracked values rather than a static file.

use axum::{
    extract::{HeaderMap, Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use kh_core::apikey::hash_token;
use kh_core::types::{Hashlist, HashlistStatus};

use super::state::ApiState;
use crate::api_error::ApiError;

#[derive(serde::Deserialize)]
pub(crate) struct CreateHashlistRequest {
    pub name: String,
    pub client: Option<String>,
    pub hash_type_id: i32,
    /// One `original_hash[:username[:domain]]` entry per line.
    pub lines: Vec<String>,
}

fn split_hash_line(line: &str) -> (String, String) {
    // hash_value is the crackable portion; username/domain prefixes (as in
    // PWDUMP-style `user:domain:hash`) are stripped before matching, but the
    // stored original_hash keeps the full line for idempotent re-ingest.
    let hash_value = line.rsplit(':').next().unwrap_or(line).to_string();
    (line.to_string(), hash_value)
}

/// GET /api/hashlists -- list all hashlists.
pub(crate) async fn list_hashlists(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<Hashlist>>, ApiError> {
    let hashlists = state
        .store
        .list_hashlists()
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(hashlists))
}

/// GET /api/hashlists/{id} -- fetch one hashlist.
pub(crate) async fn get_hashlist(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Hashlist>, ApiError> {
    let hashlist = state
        .store
        .get_hashlist(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("hashlist {id} not found")))?;
    Ok(Json(hashlist))
}

/// POST /api/hashlists -- create a hashlist and batch-insert its hashes.
/// Transitions `uploading -> ready` once ingest completes, following the
/// same constrained-UPDATE pattern every other status flip in this system
/// uses.
pub(crate) async fn create_hashlist(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateHashlistRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.lines.is_empty() {
        return Err(ApiError::BadRequest("hashlist must contain at least one hash".into()));
    }

    let hashlist = state
        .store
        .create_hashlist(&body.name, body.client.as_deref(), body.hash_type_id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let pairs: Vec<(String, String)> = body.lines.iter().map(|l| split_hash_line(l)).collect();
    state
        .store
        .insert_hashes_batch(hashlist.id, &pairs)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    state
        .store
        .set_hashlist_total(hashlist.id, body.lines.len() as i64)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    state
        .store
        .set_hashlist_status(hashlist.id, HashlistStatus::Uploading, HashlistStatus::Ready)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let hashlist = state
        .store
        .get_hashlist(hashlist.id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(hashlist))
}

/// POST /api/hashlists/{a}/link/{b} -- pair an LM hashlist with its NTLM
/// counterpart for half-crack promotion (§4.7 step 5).
pub(crate) async fn link_hashlists(
    State(state): State<Arc<ApiState>>,
    Path((a, b)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .link_hashlists(a, b)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// GET /agent/hashlists/{id} -- agent-facing download of every still-uncracked
/// value in the list, one per line, computed fresh on each request rather
/// than served from a persisted file. Gated by the same `(X-API-Key,
/// X-Agent-ID)` pair as the WebSocket upgrade.
pub(crate) async fn download_uncracked_hashlist(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let agent_id = headers
        .get("x-agent-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ApiError::BadRequest("missing X-Agent-ID header".into()))?;
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing X-API-Key header".into()))?;

    let key_hash = hash_token(api_key);
    state
        .store
        .authenticate_agent(agent_id, &key_hash)
        .await
        .map_err(|_| ApiError::NotFound("agent not found or credentials invalid".into()))?;

    let values = state
        .store
        .list_uncracked_values(id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let mut body = values.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    Ok((
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    ))
}
