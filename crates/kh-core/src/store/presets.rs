use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{AttackMode, IncrementMode, PresetJob};

use super::{Store, StoreError};

#[derive(sqlx::FromRow)]
struct PresetRow {
    id: Uuid,
    name: String,
    attack_mode: i32,
    wordlists: serde_json::Value,
    rules: serde_json::Value,
    mask: Option<String>,
    increment_mode: String,
    increment_min: Option<i32>,
    increment_max: Option<i32>,
    base_keyspace: Option<i64>,
    effective_keyspace: Option<i64>,
    is_accurate_keyspace: bool,
    use_rule_splitting: bool,
    multiplication_factor: i64,
    max_agents: i32,
    priority: i32,
    chunk_size_seconds: i64,
    binary_version: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

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

fn increment_mode_from_str(s: &str) -> IncrementMode {
    match s {
        "increment" => IncrementMode::Increment,
        "increment_inverse" => IncrementMode::IncrementInverse,
        _ => IncrementMode::None,
    }
}

fn increment_mode_str(m: IncrementMode) -> &'static str {
    match m {
        IncrementMode::None => "none",
        IncrementMode::Increment => "increment",
        IncrementMode::IncrementInverse => "increment_inverse",
    }
}

impl From<PresetRow> for PresetJob {
    fn from(r: PresetRow) -> Self {
        PresetJob {
            id: r.id,
            name: r.name,
            attack_mode: attack_mode_from_i32(r.attack_mode),
            wordlists: serde_json::from_value(r.wordlists).unwrap_or_default(),
            rules: serde_json::from_value(r.rules).unwrap_or_default(),
            mask: r.mask,
            increment_mode: increment_mode_from_str(&r.increment_mode),
            increment_min: r.increment_min,
            increment_max: r.increment_max,
            base_keyspace: r.base_keyspace,
            effective_keyspace: r.effective_keyspace,
            is_accurate_keyspace: r.is_accurate_keyspace,
            use_rule_splitting: r.use_rule_splitting,
            multiplication_factor: r.multiplication_factor,
            max_agents: r.max_agents,
            priority: r.priority,
            chunk_size_seconds: r.chunk_size_seconds,
            binary_version: r.binary_version,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl Store {
    pub async fn get_preset(&self, id: Uuid) -> Result<PresetJob, StoreError> {
        let row: PresetRow = sqlx::query_as("SELECT * FROM preset_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }

    pub async fn create_preset(&self, preset: &PresetJob) -> Result<PresetJob, StoreError> {
        let row: PresetRow = sqlx::query_as(
            "INSERT INTO preset_jobs (id, name, attack_mode, wordlists, rules, mask, increment_mode, increment_min, \
             increment_max, base_keyspace, effective_keyspace, is_accurate_keyspace, use_rule_splitting, \
             multiplication_factor, max_agents, priority, chunk_size_seconds, binary_version) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18) RETURNING *",
        )
        .bind(preset.id)
        .bind(&preset.name)
        .bind(preset.attack_mode as i32)
        .bind(serde_json::to_value(&preset.wordlists).unwrap())
        .bind(serde_json::to_value(&preset.rules).unwrap())
        .bind(&preset.mask)
        .bind(increment_mode_str(preset.increment_mode))
        .bind(preset.increment_min)
        .bind(preset.increment_max)
        .bind(preset.base_keyspace)
        .bind(preset.effective_keyspace)
        .bind(preset.is_accurate_keyspace)
        .bind(preset.use_rule_splitting)
        .bind(preset.multiplication_factor)
        .bind(preset.max_agents)
        .bind(preset.priority)
        .bind(preset.chunk_size_seconds)
        .bind(&preset.binary_version)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    pub async fn list_presets(&self) -> Result<Vec<PresetJob>, StoreError> {
        let rows: Vec<PresetRow> = sqlx::query_as("SELECT * FROM preset_jobs ORDER BY created_at DESC")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Writes back the authoritative keyspace learned from a forced
    /// benchmark (§4.5 step 1), so future `JobExecution`s reuse it.
    pub async fn record_accurate_keyspace(&self, id: Uuid, effective_keyspace: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE preset_jobs SET effective_keyspace = $2, is_accurate_keyspace = TRUE, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(effective_keyspace)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
