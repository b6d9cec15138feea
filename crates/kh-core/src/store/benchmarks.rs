use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{AgentBenchmark, AttackMode, BenchmarkRequest, BenchmarkRequestStatus};

use super::{Store, StoreError};

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

#[derive(sqlx::FromRow)]
struct BenchmarkRow {
    id: Uuid,
    agent_id: i64,
    attack_mode: i32,
    hash_type_id: i32,
    salt_count: Option<i32>,
    candidates_per_sec: i64,
    measured_at: DateTime<Utc>,
}

impl From<BenchmarkRow> for AgentBenchmark {
    fn from(r: BenchmarkRow) -> Self {
        AgentBenchmark {
            id: r.id,
            agent_id: r.agent_id,
            attack_mode: attack_mode_from_i32(r.attack_mode),
            hash_type_id: r.hash_type_id,
            salt_count: r.salt_count,
            candidates_per_sec: r.candidates_per_sec,
            measured_at: r.measured_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    agent_id: i64,
    attack_mode: i32,
    hash_type_id: i32,
    salt_count: Option<i32>,
    status: String,
    ineligible_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<RequestRow> for BenchmarkRequest {
    fn from(r: RequestRow) -> Self {
        BenchmarkRequest {
            id: r.id,
            agent_id: r.agent_id,
            attack_mode: attack_mode_from_i32(r.attack_mode),
            hash_type_id: r.hash_type_id,
            salt_count: r.salt_count,
            status: match r.status.as_str() {
                "succeeded" => BenchmarkRequestStatus::Succeeded,
                "failed" => BenchmarkRequestStatus::Failed,
                _ => BenchmarkRequestStatus::Pending,
            },
            ineligible_until: r.ineligible_until,
            created_at: r.created_at,
        }
    }
}

impl Store {
    pub async fn get_benchmark(&self, agent_id: i64, attack_mode: AttackMode, hash_type_id: i32, salt_count: Option<i32>) -> Result<Option<AgentBenchmark>, StoreError> {
        let row: Option<BenchmarkRow> = sqlx::query_as(
            "SELECT * FROM agent_benchmarks WHERE agent_id = $1 AND attack_mode = $2 AND hash_type_id = $3 \
             AND salt_count IS NOT DISTINCT FROM $4",
        )
        .bind(agent_id)
        .bind(attack_mode as i32)
        .bind(hash_type_id)
        .bind(salt_count)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn upsert_benchmark(&self, agent_id: i64, attack_mode: AttackMode, hash_type_id: i32, salt_count: Option<i32>, candidates_per_sec: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO agent_benchmarks (agent_id, attack_mode, hash_type_id, salt_count, candidates_per_sec) \
             VALUES ($1,$2,$3,$4,$5) \
             ON CONFLICT (agent_id, attack_mode, hash_type_id, salt_count) \
             DO UPDATE SET candidates_per_sec = EXCLUDED.candidates_per_sec, measured_at = now()",
        )
        .bind(agent_id)
        .bind(attack_mode as i32)
        .bind(hash_type_id)
        .bind(salt_count)
        .bind(candidates_per_sec)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// One in-flight benchmark per (agent, attack_mode, hash_type) (§4.6
    /// step 4); the unique index makes double-scheduling a no-op.
    pub async fn create_benchmark_request(&self, agent_id: i64, attack_mode: AttackMode, hash_type_id: i32, salt_count: Option<i32>) -> Result<Option<BenchmarkRequest>, StoreError> {
        let row: Option<RequestRow> = sqlx::query_as(
            "INSERT INTO benchmark_requests (agent_id, attack_mode, hash_type_id, salt_count) VALUES ($1,$2,$3,$4) \
             ON CONFLICT (agent_id, attack_mode, hash_type_id) DO NOTHING RETURNING *",
        )
        .bind(agent_id)
        .bind(attack_mode as i32)
        .bind(hash_type_id)
        .bind(salt_count)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn resolve_benchmark_request(&self, id: Uuid, succeeded: bool, backoff_secs: i64) -> Result<(), StoreError> {
        if succeeded {
            sqlx::query("UPDATE benchmark_requests SET status = 'succeeded' WHERE id = $1")
                .bind(id)
                .execute(self.pool())
                .await?;
        } else {
            sqlx::query(
                "UPDATE benchmark_requests SET status = 'failed', ineligible_until = now() + make_interval(secs => $2) WHERE id = $1",
            )
            .bind(id)
            .bind(backoff_secs as f64)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }
}
