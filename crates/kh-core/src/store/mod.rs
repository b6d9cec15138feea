//! The persistent store (C1): a Postgres-backed relational store with
//! strong single-row transactions and row-level locking.
//!
//! Other components never issue raw SQL against the pool directly — they go
//! through [`Store`] and the per-aggregate repository modules, which wrap the
//! three primitives named in the design: `SELECT ... FOR UPDATE SKIP LOCKED`
//! for work-claiming, `INSERT ... ON CONFLICT DO NOTHING` for idempotent
//! insertion, and constrained `UPDATE ... WHERE status = X` for optimistic
//! state transitions.

pub mod agents;
pub mod benchmarks;
pub mod devices;
pub mod hashes;
pub mod hashlists;
pub mod jobs;
pub mod presets;
pub mod settings;
pub mod tasks;
pub mod vouchers;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;

/// Errors surfaced by every store operation. Session handlers and the
/// scheduler log-and-continue on these; only migration failures at startup
/// are fatal (§7: "all store operations return an error kind").
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("constrained update affected no rows (expected precondition not met)")]
    PreconditionFailed,
    #[error("not found")]
    NotFound,
}

/// A single Postgres connection pool shared by all repositories. Cheap to
/// clone — `PgPool` is itself an `Arc` handle.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

/// A running transaction. The scheduler must never hold one across a session
/// write (§5) — callers obtain a `Tx`, do their row-level work, and commit or
/// roll back before touching the gateway.
pub type Tx<'a> = sqlx::Transaction<'a, Postgres>;

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations in their numbered sequence. Idempotent: safe
    /// to call on every startup.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn begin(&self) -> Result<Tx<'_>, StoreError> {
        Ok(self.pool.begin().await?)
    }
}

/// Returns `Err(StoreError::PreconditionFailed)` when a constrained
/// `UPDATE`/`INSERT` affected zero rows, otherwise `Ok(())`. Centralizes the
/// "optimistic transition didn't apply" check used across every repository.
pub(crate) fn require_affected(rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::PreconditionFailed)
    } else {
        Ok(())
    }
}
