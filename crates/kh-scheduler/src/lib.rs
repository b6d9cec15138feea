//! Task Scheduler (C6): on every tick, matches ready jobs to idle,
//! compatible agents and dispatches one task each.
//!
//! A tick never blocks waiting on an agent: assignment is the two-phase
//! store transaction (`assign_task`), send is fire-and-forget over the
//! gateway outbox, and a send failure reverts the assignment so the task
//! is retried next tick. Modeled on `kh-daemon`'s `run_loops` shape — one
//! `tokio::select!` over an interval and a shutdown subscription.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{Timelike, Utc};
use tracing::{error, info, warn};

use kh_bridge::gateway::{GatewayError, GatewayRegistry};
use kh_bridge::protocol::AgentMessage;
use kh_core::config::SchedulerConfig;
use kh_core::store::{Store, StoreError};
use kh_core::types::{Agent, JobExecution, JobExecutionStatus, JobTask, PresetJob};
use kh_harness::shutdown::ShutdownSignal;
use kh_planner::{JobPlanner, PlannerError};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Whether `now` falls inside an agent's scheduling window. The window is
/// stored as an opaque JSON object with `start`/`end` "HH:MM" fields (UTC);
/// absent entirely, or a window missing either bound, means "always on".
fn within_schedule_window(window: Option<&serde_json::Value>, now: chrono::DateTime<Utc>) -> bool {
    let Some(window) = window else { return true };
    let (Some(start), Some(end)) = (window.get("start").and_then(|v| v.as_str()), window.get("end").and_then(|v| v.as_str())) else {
        return true;
    };
    let parse = |s: &str| -> Option<(u32, u32)> {
        let (h, m) = s.split_once(':')?;
        Some((h.parse().ok()?, m.parse().ok()?))
    };
    let (Some((sh, sm)), Some((eh, em))) = (parse(start), parse(end)) else { return true };
    let minutes = |h: u32, m: u32| h * 60 + m;
    let cur = minutes(now.time().hour(), now.time().minute());
    let start_min = minutes(sh, sm);
    let end_min = minutes(eh, em);
    if start_min <= end_min {
        cur >= start_min && cur < end_min
    } else {
        // Window wraps past midnight.
        cur >= start_min || cur < end_min
    }
}

pub struct TaskScheduler {
    store: Store,
    gateway: GatewayRegistry,
    planner: JobPlanner,
    config: SchedulerConfig,
    round_robin_cursor: AtomicUsize,
}

impl TaskScheduler {
    pub fn new(store: Store, gateway: GatewayRegistry, config: SchedulerConfig, planner: JobPlanner) -> Self {
        Self { store, gateway, planner, config, round_robin_cursor: AtomicUsize::new(0) }
    }

    /// Run one scheduling pass. Returns how many tasks were dispatched.
    pub async fn tick(&self) -> usize {
        let jobs = match self.store.list_ready_job_executions().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "failed to list ready jobs");
                return 0;
            }
        };

        let mut dispatched = 0;
        for job in jobs {
            match self.dispatch_one(&job).await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => warn!(job_execution_id = %job.id, error = %e, "scheduling attempt failed"),
            }
        }
        dispatched
    }

    async fn dispatch_one(&self, job: &JobExecution) -> Result<bool, SchedulerError> {
        let preset = self.store.get_preset(job.preset_job_id).await?;
        let hashlist = self.store.get_hashlist(job.hashlist_id).await?;

        let Some(task) = self.claim_or_plan_task(job, &preset).await? else {
            return Ok(false);
        };

        let candidates = self.candidate_agents(&preset).await?;
        let Some(agent) = self.select_agent(&candidates) else {
            return Ok(false);
        };

        if !self.benchmark_ready(&agent, &preset, hashlist.hash_type_id).await? {
            return Ok(false);
        }

        let assignment = self.build_assignment(&task, job, &preset, &hashlist).await?;

        let mut tx = self.store.begin().await?;
        match self.store.assign_task(&mut tx, task.id, agent.id).await {
            Ok(()) => tx.commit().await?,
            Err(_) => {
                tx.rollback().await.ok();
                return Ok(false);
            }
        }

        if let Err(e) = self.gateway.send(agent.id, AgentMessage::JobAssignment { task: assignment }) {
            warn!(agent_id = agent.id, task_id = %task.id, error = %e, "dispatch send failed, reverting assignment");
            self.store.revert_assignment(task.id, agent.id).await?;
            return Ok(false);
        }

        if job.status == JobExecutionStatus::Pending {
            let _ = self.store.set_job_status(job.id, JobExecutionStatus::Pending, JobExecutionStatus::Running).await;
        }

        info!(job_execution_id = %job.id, task_id = %task.id, agent_id = agent.id, "task dispatched");
        Ok(true)
    }

    /// A pending task already waiting for an agent takes priority over
    /// planning a new slice, so the planner only grows the keyspace frontier
    /// when dispatch has caught up with everything already sliced.
    async fn claim_or_plan_task(&self, job: &JobExecution, preset: &PresetJob) -> Result<Option<JobTask>, SchedulerError> {
        let mut tx = self.store.begin().await?;
        let existing = self.store.claim_candidate_task(&mut tx, job.id).await?;
        tx.commit().await?;
        if existing.is_some() {
            return Ok(existing);
        }
        Ok(self.planner.allocate_next_slice(job.id, preset).await?)
    }

    async fn candidate_agents(&self, preset: &PresetJob) -> Result<Vec<Agent>, SchedulerError> {
        let now = Utc::now();
        let mut result = Vec::new();
        for agent in self.store.list_dispatch_candidates().await? {
            if !kh_core::binary_version::matches(&preset.binary_version, &agent.binary_version) {
                continue;
            }
            if !self.store.has_enabled_device(agent.id).await? {
                continue;
            }
            if !within_schedule_window(agent.schedule_window.as_ref(), now) {
                continue;
            }
            result.push(agent);
        }
        Ok(result)
    }

    /// Overflow policy for picking among multiple eligible idle agents: fifo
    /// takes the store's default (most-recently-active-first) ordering,
    /// round_robin cycles so load spreads across the whole candidate set
    /// instead of always landing on the same agent.
    fn select_agent(&self, candidates: &[Agent]) -> Option<Agent> {
        if candidates.is_empty() {
            return None;
        }
        match self.config.agent_overflow_allocation_mode.as_str() {
            "round_robin" => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates[idx].clone())
            }
            _ => Some(candidates[0].clone()),
        }
    }

    /// Benchmark gate: a task only dispatches to an agent once a rate is on
    /// file for (agent, attack_mode, hash_type). Otherwise a benchmark
    /// request is kicked off (idempotent via the unique index) and this
    /// tick defers; `BenchmarkResult` resolution happens off the scheduler's
    /// path, driven by the agent's reply.
    async fn benchmark_ready(&self, agent: &Agent, preset: &PresetJob, hash_type_id: i32) -> Result<bool, SchedulerError> {
        if self.store.get_benchmark(agent.id, preset.attack_mode, hash_type_id, None).await?.is_some() {
            return Ok(true);
        }
        if let Some(request) = self.store.create_benchmark_request(agent.id, preset.attack_mode, hash_type_id, None).await? {
            let msg = AgentMessage::BenchmarkRequest {
                request_id: request.id,
                attack_mode: preset.attack_mode as i32,
                hash_type_id,
                salt_count: None,
            };
            if let Err(e) = self.gateway.send(agent.id, msg) {
                warn!(agent_id = agent.id, error = %e, "benchmark request send failed");
            }
        }
        Ok(false)
    }

    async fn build_assignment(
        &self,
        task: &JobTask,
        job: &JobExecution,
        preset: &PresetJob,
        hashlist: &kh_core::types::Hashlist,
    ) -> Result<kh_bridge::protocol::TaskAssignment, SchedulerError> {
        let split = self.split_for(task).await?;
        Ok(kh_bridge::protocol::TaskAssignment {
            task_id: task.id,
            job_execution_id: job.id,
            hashlist_id: hashlist.id,
            attack_mode: preset.attack_mode as i32,
            hash_type_id: hashlist.hash_type_id,
            keyspace_start: task.keyspace_start,
            keyspace_end: task.keyspace_end,
            split,
            wordlist_names: preset.wordlists.clone(),
            rule_names: preset.rules.clone(),
            mask: preset.mask.clone(),
        })
    }

    async fn split_for(&self, task: &JobTask) -> Result<kh_core::types::SplitMode, SchedulerError> {
        use kh_core::types::SplitMode;
        if let Some(layer_id) = task.layer_id {
            let layers = self.store.list_layers(task.job_execution_id).await?;
            let layer_index = layers.iter().find(|l| l.id == layer_id).map(|l| l.layer_index).unwrap_or(0);
            return Ok(SplitMode::IncrementLayer { layer_index });
        }
        Ok(if task.is_keyspace_split {
            SplitMode::KeyspaceSplit { skip: task.keyspace_start, limit: task.keyspace_end - task.keyspace_start }
        } else {
            SplitMode::RuleSplit { rule_subrange: (task.keyspace_start, task.keyspace_end) }
        })
    }
}

/// Drives [`TaskScheduler::tick`] on `config.tick_interval_ms`, stopping
/// cleanly when `shutdown` fires.
pub async fn run(scheduler: std::sync::Arc<TaskScheduler>, shutdown: ShutdownSignal) {
    let mut tick_interval = tokio::time::interval(Duration::from_millis(scheduler.config.tick_interval_ms));
    tick_interval.tick().await;
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                let dispatched = scheduler.tick().await;
                if dispatched > 0 {
                    info!(dispatched, "scheduler tick complete");
                }
            }
            _ = shutdown_rx.recv() => {
                info!("scheduler loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schedule_window_none_is_always_on() {
        assert!(within_schedule_window(None, Utc::now()));
    }

    #[test]
    fn schedule_window_same_day_range() {
        let window = json!({"start": "09:00", "end": "17:00"});
        let inside = Utc::now().date_naive().and_hms_opt(12, 0, 0).unwrap().and_utc();
        let outside = Utc::now().date_naive().and_hms_opt(20, 0, 0).unwrap().and_utc();
        assert!(within_schedule_window(Some(&window), inside));
        assert!(!within_schedule_window(Some(&window), outside));
    }

    #[test]
    fn schedule_window_wraps_midnight() {
        let window = json!({"start": "22:00", "end": "06:00"});
        let late_night = Utc::now().date_naive().and_hms_opt(23, 30, 0).unwrap().and_utc();
        let midday = Utc::now().date_naive().and_hms_opt(12, 0, 0).unwrap().and_utc();
        assert!(within_schedule_window(Some(&window), late_night));
        assert!(!within_schedule_window(Some(&window), midday));
    }

    #[test]
    fn round_robin_cycles_through_candidates() {
        fn agent(id: i64) -> Agent {
            Agent {
                id,
                api_key_hash: String::new(),
                hostname: String::new(),
                status: kh_core::types::AgentStatus::Active,
                sync_status: kh_core::types::SyncStatus::Completed,
                busy: false,
                current_task_id: None,
                binary_version: "default".into(),
                schedule_window: None,
                last_heartbeat: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }
        }
        let store = Store::from_pool(sqlx::PgPool::connect_lazy("postgres://invalid/invalid").expect("lazy pool"));
        let gateway = GatewayRegistry::new(kh_core::config::GatewayConfig::default());
        let planner = JobPlanner::new(store.clone(), kh_core::config::PlannerConfig::default());
        let mut config = SchedulerConfig::default();
        config.agent_overflow_allocation_mode = "round_robin".into();
        let scheduler = TaskScheduler::new(store, gateway, config, planner);

        let candidates = vec![agent(1), agent(2), agent(3)];
        let picks: Vec<i64> = (0..4).map(|_| scheduler.select_agent(&candidates).unwrap().id).collect();
        assert_eq!(picks, vec![1, 2, 3, 1]);
    }
}
