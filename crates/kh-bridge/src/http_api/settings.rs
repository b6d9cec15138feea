//! System settings (§6): a flat key/value store for the handful of runtime
//! knobs operators tune without a redeploy (`agent_overflow_allocation_mode`,
//! `chunk_size_seconds`, `potfile_batch_interval_secs`, ...).

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use kh_api_types::SettingUpdateRequest;

use super::state::ApiState;
use crate::api_error::ApiError;

/// GET /api/settings/{key} -- read a single setting; `value: null` if unset.
pub(crate) async fn get_setting(
    State(state): State<Arc<ApiState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let value = state
        .store
        .get_setting(&key)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(kh_api_types::SettingResponse { key, value }))
}

/// PUT /api/settings/{key} -- upsert a setting value.
pub(crate) async fn put_setting(
    State(state): State<Arc<ApiState>>,
    Path(key): Path<String>,
    Json(body): Json<SettingUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .set_setting(&key, body.value.clone())
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(kh_api_types::SettingResponse {
        key,
        value: Some(body.value),
    }))
}
