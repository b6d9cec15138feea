//! Job Planner (C5): turns a `JobExecution`'s remaining keyspace into
//! bounded slices a `JobTask` can carry.
//!
//! Allocation is transactional against the job's row lock
//! (`lock_job_execution_for_allocation`), so two planner ticks racing on the
//! same job never hand out overlapping keyspace. The planner picks a job's
//! [`SplitMode`] once, from its preset, and keeps slicing within that mode
//! until the job's effective keyspace is exhausted. The pure slicing math
//! lives in free functions so it can be unit-tested without a database.

use uuid::Uuid;

use kh_core::config::PlannerConfig;
use kh_core::store::{Store, StoreError, Tx};
use kh_core::types::{IncrementMode, JobExecution, JobExecutionStatus, JobIncrementLayer, JobTask, PresetJob, SplitMode};

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A slice ready to become a `JobTask`, before it's written to the store.
struct PendingSlice {
    keyspace_start: i64,
    keyspace_end: i64,
    layer_id: Option<Uuid>,
    split_mode: SplitMode,
}

/// A preset's configured `chunk_size_seconds` is the slice size directly
/// (scaled by `multiplication_factor` for rule-multiplied attacks), floored
/// by the deployment's `min_chunk_duration_secs` so a misconfigured preset
/// can't produce slices too small to be worth dispatching.
fn chunk_size(preset: &PresetJob, config: &PlannerConfig) -> i64 {
    let mult = preset.multiplication_factor.max(1);
    let configured = preset.chunk_size_seconds.max(1) * mult;
    let floor = config.min_chunk_duration_secs as i64 * mult;
    configured.max(floor)
}

/// Next slice within a flat (non-increment) keyspace, or `None` once fully
/// dispatched. Rule-split and plain keyspace-split jobs share this math;
/// they differ only in which [`SplitMode`] payload the agent receives.
fn plain_slice(dispatched: i64, effective: i64, chunk: i64, use_rule_splitting: bool, has_rules: bool) -> Option<(i64, i64, SplitMode)> {
    if dispatched >= effective {
        return None;
    }
    let start = dispatched;
    let end = (start + chunk).min(effective);
    let mode = if use_rule_splitting && has_rules {
        SplitMode::RuleSplit { rule_subrange: (start, end) }
    } else {
        SplitMode::KeyspaceSplit { skip: start, limit: end - start }
    };
    Some((start, end, mode))
}

/// Mask lengths in dispatch order: ascending for `Increment`, descending for
/// `IncrementInverse`.
fn layer_lengths(min: i32, max: i32, inverse: bool) -> Vec<i32> {
    if inverse {
        (min..=max).rev().collect()
    } else {
        (min..=max).collect()
    }
}

/// Splits a job's effective keyspace evenly across its layers, folding the
/// remainder into the last one so the shares sum exactly.
fn layer_shares(effective_keyspace: i64, layer_count: i64) -> Vec<i64> {
    if layer_count <= 0 {
        return Vec::new();
    }
    let base = effective_keyspace / layer_count;
    let mut shares = vec![base; layer_count as usize];
    if let Some(last) = shares.last_mut() {
        *last = effective_keyspace - base * (layer_count - 1);
    }
    shares
}

pub struct JobPlanner {
    store: Store,
    config: PlannerConfig,
}

impl JobPlanner {
    pub fn new(store: Store, config: PlannerConfig) -> Self {
        Self { store, config }
    }

    /// Allocate the next slice for a job. Returns `Ok(None)` when the job
    /// isn't in a schedulable state, has nothing left to dispatch, or (for
    /// increment-mode jobs) is waiting on its current layer to finish
    /// processing before the next one becomes eligible.
    pub async fn allocate_next_slice(&self, job_execution_id: Uuid, preset: &PresetJob) -> Result<Option<JobTask>, PlannerError> {
        let mut tx = self.store.begin().await?;
        let job = self.store.lock_job_execution_for_allocation(&mut tx, job_execution_id).await?;

        if !matches!(job.status, JobExecutionStatus::Pending | JobExecutionStatus::Running) {
            tx.commit().await?;
            return Ok(None);
        }

        let slice = if preset.increment_mode != IncrementMode::None {
            self.next_increment_slice(&mut tx, &job, preset).await?
        } else {
            plain_slice(
                job.dispatched_keyspace,
                job.effective_keyspace,
                chunk_size(preset, &self.config),
                preset.use_rule_splitting,
                !preset.rules.is_empty(),
            )
            .map(|(start, end, mode)| PendingSlice { keyspace_start: start, keyspace_end: end, layer_id: None, split_mode: mode })
        };

        let Some(slice) = slice else {
            tx.commit().await?;
            return Ok(None);
        };

        self.store
            .bump_dispatched_keyspace(&mut tx, job.id, slice.keyspace_end - slice.keyspace_start)
            .await?;

        let mut task = JobTask::new(
            job.id,
            slice.keyspace_start,
            slice.keyspace_end,
            matches!(slice.split_mode, SplitMode::KeyspaceSplit { .. }),
        );
        task.layer_id = slice.layer_id;
        let task = self.store.create_task(&mut tx, &task).await?;

        tx.commit().await?;
        Ok(Some(task))
    }

    /// Layers run in order: one fully completes before the next becomes
    /// eligible. Created lazily on first allocation for an increment-mode
    /// job.
    async fn next_increment_slice(&self, tx: &mut Tx<'_>, job: &JobExecution, preset: &PresetJob) -> Result<Option<PendingSlice>, PlannerError> {
        let layers = self.store.list_layers(job.id).await?;
        let layers = if layers.is_empty() { self.create_layers(job, preset).await? } else { layers };

        let chunk = chunk_size(preset, &self.config);

        for layer in &layers {
            if layer.status == JobExecutionStatus::Completed {
                continue;
            }
            if layer.dispatched_keyspace >= layer.effective_keyspace {
                // Fully dispatched but not yet reported complete: blocked
                // until the ingestor finishes accounting for it.
                return Ok(None);
            }
            let start = layer.dispatched_keyspace;
            let end = (start + chunk).min(layer.effective_keyspace);
            self.store.bump_layer_dispatched(tx, layer.id, end - start).await?;
            return Ok(Some(PendingSlice {
                keyspace_start: start,
                keyspace_end: end,
                layer_id: Some(layer.id),
                split_mode: SplitMode::IncrementLayer { layer_index: layer.layer_index },
            }));
        }
        Ok(None)
    }

    async fn create_layers(&self, job: &JobExecution, preset: &PresetJob) -> Result<Vec<JobIncrementLayer>, PlannerError> {
        let min = preset.increment_min.unwrap_or(1);
        let max = preset.increment_max.unwrap_or(min);
        let inverse = preset.increment_mode == IncrementMode::IncrementInverse;
        let lengths = layer_lengths(min, max, inverse);
        let shares = layer_shares(job.effective_keyspace, lengths.len() as i64);

        let now = chrono::Utc::now();
        let mut layers = Vec::with_capacity(lengths.len());
        for (i, (mask_length, share)) in lengths.into_iter().zip(shares).enumerate() {
            let layer = JobIncrementLayer {
                id: Uuid::new_v4(),
                job_execution_id: job.id,
                layer_index: i as i32,
                mask_length,
                status: JobExecutionStatus::Pending,
                base_keyspace: share,
                effective_keyspace: share,
                dispatched_keyspace: 0,
                processed_keyspace: 0,
                created_at: now,
                updated_at: now,
            };
            layers.push(self.store.create_increment_layer(&layer).await?);
        }
        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_scales_with_multiplication_factor() {
        let mut preset = PresetJob::new("p", kh_core::types::AttackMode::Dictionary);
        preset.chunk_size_seconds = 1200;
        preset.multiplication_factor = 4;
        let config = PlannerConfig::default();
        assert_eq!(chunk_size(&preset, &config), 4800);
    }

    #[test]
    fn chunk_size_floors_on_min_chunk_duration() {
        let mut preset = PresetJob::new("p", kh_core::types::AttackMode::Dictionary);
        preset.chunk_size_seconds = 1;
        let config = PlannerConfig { min_chunk_duration_secs: 30, ..PlannerConfig::default() };
        assert_eq!(chunk_size(&preset, &config), 30);
    }

    #[test]
    fn plain_slice_stops_at_exhaustion() {
        assert_eq!(plain_slice(900, 1000, 1200, false, false), Some((900, 1000, SplitMode::KeyspaceSplit { skip: 900, limit: 100 })));
        assert_eq!(plain_slice(1000, 1000, 1200, false, false), None);
    }

    #[test]
    fn plain_slice_prefers_rule_split_when_configured() {
        let (start, end, mode) = plain_slice(0, 500, 200, true, true).unwrap();
        assert_eq!((start, end), (0, 200));
        assert_eq!(mode, SplitMode::RuleSplit { rule_subrange: (0, 200) });
    }

    #[test]
    fn layer_lengths_respects_direction() {
        assert_eq!(layer_lengths(4, 7, false), vec![4, 5, 6, 7]);
        assert_eq!(layer_lengths(4, 7, true), vec![7, 6, 5, 4]);
    }

    #[test]
    fn layer_shares_sum_to_total_with_remainder_on_last() {
        let shares = layer_shares(100, 3);
        assert_eq!(shares, vec![33, 33, 34]);
        assert_eq!(shares.iter().sum::<i64>(), 100);
    }

    #[test]
    fn layer_shares_empty_for_zero_layers() {
        assert!(layer_shares(100, 0).is_empty());
    }
}
