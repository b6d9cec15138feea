use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::Hash;

use super::{require_affected, Store, StoreError};

#[derive(sqlx::FromRow)]
struct HashRow {
    id: Uuid,
    original_hash: String,
    hash_value: String,
    username: Option<String>,
    domain: Option<String>,
    is_cracked: bool,
    password: Option<String>,
    cracked_by_task_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<HashRow> for Hash {
    fn from(r: HashRow) -> Self {
        Hash {
            id: r.id,
            original_hash: r.original_hash,
            hash_value: r.hash_value,
            username: r.username,
            domain: r.domain,
            is_cracked: r.is_cracked,
            password: r.password,
            cracked_by_task_id: r.cracked_by_task_id,
            created_at: r.created_at,
        }
    }
}

impl Store {
    /// Bulk, idempotent insertion for hashlist ingest (§5 "batched inserts");
    /// `ON CONFLICT DO NOTHING` on `original_hash` makes re-ingest a no-op.
    pub async fn insert_hashes_batch(&self, hashlist_id: Uuid, hashes: &[(String, String)]) -> Result<u64, StoreError> {
        let mut tx = self.pool().begin().await?;
        let mut inserted = 0u64;
        for (original_hash, hash_value) in hashes {
            let id: Option<Uuid> = sqlx::query_scalar(
                "INSERT INTO hashes (original_hash, hash_value) VALUES ($1, $2) \
                 ON CONFLICT (original_hash) DO NOTHING RETURNING id",
            )
            .bind(original_hash)
            .bind(hash_value)
            .fetch_optional(&mut *tx)
            .await?;
            let hash_id = match id {
                Some(id) => {
                    inserted += 1;
                    id
                }
                None => {
                    sqlx::query_scalar("SELECT id FROM hashes WHERE original_hash = $1")
                        .bind(original_hash)
                        .fetch_one(&mut *tx)
                        .await?
                }
            };
            sqlx::query("INSERT INTO hashlist_hashes (hashlist_id, hash_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(hashlist_id)
                .bind(hash_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// The unique at-most-once crack flip (§4.7 step 2, §8 testable
    /// property): affects 0 rows when already cracked, making double
    /// reports naturally idempotent.
    pub async fn mark_cracked(&self, hash_id: Uuid, password: &str, task_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE hashes SET is_cracked = TRUE, password = $2, cracked_by_task_id = $3 \
             WHERE id = $1 AND is_cracked = FALSE",
        )
        .bind(hash_id)
        .bind(password)
        .bind(task_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_hash_value(&self, hashlist_id: Uuid, hash_value: &str) -> Result<Hash, StoreError> {
        let row: HashRow = sqlx::query_as(
            "SELECT h.* FROM hashes h JOIN hashlist_hashes hh ON hh.hash_id = h.id \
             WHERE hh.hashlist_id = $1 AND h.hash_value = $2",
        )
        .bind(hashlist_id)
        .bind(hash_value)
        .fetch_optional(self.pool())
        .await?
        .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }

    /// Streamed for `/agent/hashlists/{id}` (§6): uncracked hash_values only,
    /// no file persisted server-side.
    pub async fn list_uncracked_values(&self, hashlist_id: Uuid) -> Result<Vec<String>, StoreError> {
        let values: Vec<String> = sqlx::query_scalar(
            "SELECT h.hash_value FROM hashes h JOIN hashlist_hashes hh ON hh.hash_id = h.id \
             WHERE hh.hashlist_id = $1 AND h.is_cracked = FALSE",
        )
        .bind(hashlist_id)
        .fetch_all(self.pool())
        .await?;
        Ok(values)
    }

    /// LM half crack bookkeeping (§4.7 step 5): records one half as cracked;
    /// the caller checks `lm_pair_complete` before attempting NTLM promotion.
    pub async fn mark_lm_half_cracked(&self, hash_id: Uuid, half_index: i16, plaintext: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE lm_half_crack SET is_cracked = TRUE, plaintext = $3 \
             WHERE hash_id = $1 AND half_index = $2 AND is_cracked = FALSE",
        )
        .bind(hash_id)
        .bind(half_index)
        .bind(plaintext)
        .execute(self.pool())
        .await?;
        require_affected(result.rows_affected())
    }

    pub async fn lm_pair_complete(&self, hash_id: Uuid) -> Result<Option<(String, String)>, StoreError> {
        let rows: Vec<(i16, Option<String>)> = sqlx::query_as(
            "SELECT half_index, plaintext FROM lm_half_crack WHERE hash_id = $1 AND is_cracked = TRUE",
        )
        .bind(hash_id)
        .fetch_all(self.pool())
        .await?;
        if rows.len() < 2 {
            return Ok(None);
        }
        let first = rows.iter().find(|(i, _)| *i == 0).and_then(|(_, p)| p.clone());
        let second = rows.iter().find(|(i, _)| *i == 1).and_then(|(_, p)| p.clone());
        match (first, second) {
            (Some(a), Some(b)) => Ok(Some((a, b))),
            _ => Ok(None),
        }
    }
}
