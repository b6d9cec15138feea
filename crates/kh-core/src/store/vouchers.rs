use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::ClaimVoucher;

use super::{require_affected, Store, StoreError};

#[derive(sqlx::FromRow)]
struct VoucherRow {
    id: Uuid,
    token_hash: String,
    issued_hostname_constraint: Option<String>,
    single_use: bool,
    consumed_at: Option<DateTime<Utc>>,
    consumed_by_agent_id: Option<i64>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl From<VoucherRow> for ClaimVoucher {
    fn from(r: VoucherRow) -> Self {
        ClaimVoucher {
            id: r.id,
            token_hash: r.token_hash,
            issued_hostname_constraint: r.issued_hostname_constraint,
            single_use: r.single_use,
            consumed_at: r.consumed_at,
            consumed_by_agent_id: r.consumed_by_agent_id,
            created_at: r.created_at,
            expires_at: r.expires_at,
        }
    }
}

impl Store {
    pub async fn create_voucher(
        &self,
        token_hash: &str,
        hostname_constraint: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ClaimVoucher, StoreError> {
        let row: VoucherRow = sqlx::query_as(
            "INSERT INTO claim_vouchers (token_hash, issued_hostname_constraint, expires_at) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(token_hash)
        .bind(hostname_constraint)
        .bind(expires_at)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    pub async fn get_voucher_by_hash(&self, token_hash: &str) -> Result<ClaimVoucher, StoreError> {
        let row: VoucherRow = sqlx::query_as("SELECT * FROM claim_vouchers WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }

    /// Atomically consumes a single-use voucher; affects 0 rows if it was
    /// already consumed (idempotent redemption protection).
    pub async fn consume_voucher(&self, tx: &mut super::Tx<'_>, id: Uuid, agent_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE claim_vouchers SET consumed_at = now(), consumed_by_agent_id = $2 \
             WHERE id = $1 AND consumed_at IS NULL",
        )
        .bind(id)
        .bind(agent_id)
        .execute(&mut **tx)
        .await?;
        require_affected(result.rows_affected())
    }
}
