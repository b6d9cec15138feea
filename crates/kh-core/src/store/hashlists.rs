use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{Hashlist, HashlistStatus};

use super::{require_affected, Store, StoreError};

#[derive(sqlx::FromRow)]
struct HashlistRow {
    id: Uuid,
    name: String,
    client: Option<String>,
    hash_type_id: i32,
    total_hashes: i64,
    cracked_hashes: i64,
    status: String,
    exclude_from_potfile: bool,
    linked_hashlist_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn status_str(s: HashlistStatus) -> &'static str {
    match s {
        HashlistStatus::Uploading => "uploading",
        HashlistStatus::Processing => "processing",
        HashlistStatus::Ready => "ready",
        HashlistStatus::Error => "error",
    }
}

fn parse_status(s: &str) -> HashlistStatus {
    match s {
        "processing" => HashlistStatus::Processing,
        "ready" => HashlistStatus::Ready,
        "error" => HashlistStatus::Error,
        _ => HashlistStatus::Uploading,
    }
}

impl From<HashlistRow> for Hashlist {
    fn from(r: HashlistRow) -> Self {
        Hashlist {
            id: r.id,
            name: r.name,
            client: r.client,
            hash_type_id: r.hash_type_id,
            total_hashes: r.total_hashes,
            cracked_hashes: r.cracked_hashes,
            status: parse_status(&r.status),
            exclude_from_potfile: r.exclude_from_potfile,
            linked_hashlist_id: r.linked_hashlist_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl Store {
    pub async fn create_hashlist(&self, name: &str, client: Option<&str>, hash_type_id: i32) -> Result<Hashlist, StoreError> {
        let row: HashlistRow = sqlx::query_as(
            "INSERT INTO hashlists (name, client, hash_type_id) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(name)
        .bind(client)
        .bind(hash_type_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    pub async fn list_hashlists(&self) -> Result<Vec<Hashlist>, StoreError> {
        let rows: Vec<HashlistRow> = sqlx::query_as("SELECT * FROM hashlists ORDER BY created_at DESC")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Recorded once ingest finishes counting rows (§5); `total_hashes` is
    /// the only field this touches.
    pub async fn set_hashlist_total(&self, id: Uuid, total_hashes: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE hashlists SET total_hashes = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(total_hashes)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_hashlist(&self, id: Uuid) -> Result<Hashlist, StoreError> {
        let row: HashlistRow = sqlx::query_as("SELECT * FROM hashlists WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }

    /// Constrained transition guarding the "immutable once ready" rule (§3).
    pub async fn set_hashlist_status(&self, id: Uuid, from: HashlistStatus, to: HashlistStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE hashlists SET status = $1, updated_at = now() WHERE id = $2 AND status = $3")
            .bind(status_str(to))
            .bind(id)
            .bind(status_str(from))
            .execute(self.pool())
            .await?;
        require_affected(result.rows_affected())
    }

    /// Recomputed, never wire-authoritative (§4.7 job-level rollup note
    /// applies analogously to hashlist crack counters).
    pub async fn refresh_cracked_count(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE hashlists SET cracked_hashes = ( \
                SELECT count(*) FROM hashlist_hashes hh JOIN hashes h ON h.id = hh.hash_id \
                WHERE hh.hashlist_id = $1 AND h.is_cracked = TRUE \
             ), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn link_hashlists(&self, a: Uuid, b: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE hashlists SET linked_hashlist_id = $2 WHERE id = $1")
            .bind(a)
            .bind(b)
            .execute(self.pool())
            .await?;
        sqlx::query("UPDATE hashlists SET linked_hashlist_id = $2 WHERE id = $1")
            .bind(b)
            .bind(a)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
