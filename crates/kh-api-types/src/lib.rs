//! Shared API response types for KrakenHashes services.
//!
//! This crate provides common type definitions used across multiple services
//! to ensure consistency in API responses and reduce code duplication. It
//! holds the thin request/response envelopes for the operator REST surface
//! and the agent registration flow — the domain objects themselves
//! (`Agent`, `JobExecution`, `JobTask`, ...) live in `kh-core::types` and are
//! serialized directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PaginationQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(50).min(500)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Agent registration (§4.2)
// ---------------------------------------------------------------------------

/// POST /api/vouchers -- admin mints a single-use claim voucher.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVoucherRequest {
    pub hostname_constraint: Option<String>,
    #[serde(default)]
    pub expires_in_secs: Option<i64>,
}

/// The plaintext token is shown exactly once; only its hash is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct VoucherResponse {
    pub id: Uuid,
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// POST /agent/register -- an agent redeems a voucher for credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimRequest {
    pub token: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimResponse {
    pub agent_id: i64,
    pub api_key: String,
}

// ---------------------------------------------------------------------------
// Presets / job executions (§4.5)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePresetRequest {
    pub name: String,
    pub attack_mode: i32,
    #[serde(default)]
    pub wordlists: Vec<String>,
    #[serde(default)]
    pub rules: Vec<String>,
    pub mask: Option<String>,
    #[serde(default)]
    pub increment_min: Option<i32>,
    #[serde(default)]
    pub increment_max: Option<i32>,
    #[serde(default)]
    pub use_rule_splitting: bool,
    #[serde(default = "default_multiplication_factor")]
    pub multiplication_factor: i64,
    #[serde(default = "default_max_agents")]
    pub max_agents: i32,
    #[serde(default)]
    pub priority: i32,
}

fn default_multiplication_factor() -> i64 {
    1
}
fn default_max_agents() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobExecutionRequest {
    pub preset_job_id: Uuid,
    pub hashlist_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobExecutionQuery {
    #[serde(flatten)]
    pub pagination: PaginationQuery,
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Devices (§4.2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceUpdateRequest {
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Settings (§6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SettingUpdateRequest {
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Generic error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        let q = PaginationQuery { limit: None, offset: None };
        assert_eq!(q.limit(), 50);
        assert_eq!(q.offset(), 0);
    }

    #[test]
    fn pagination_clamps_limit() {
        let q = PaginationQuery { limit: Some(10_000), offset: Some(5) };
        assert_eq!(q.limit(), 500);
        assert_eq!(q.offset(), 5);
    }
}
