use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// AgentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Active,
    Inactive,
    Disabled,
    Error,
}

impl AgentStatus {
    /// Returns `true` when a transition from `self` to `target` is valid,
    /// per the C2 lifecycle: pending -> active <-> inactive/disabled/error.
    pub fn can_transition_to(&self, target: &AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, target),
            (Pending, Active)
                | (Active, Inactive)
                | (Active, Disabled)
                | (Active, Error)
                | (Inactive, Active)
                | (Inactive, Disabled)
                | (Disabled, Active)
                | (Error, Active)
                | (Error, Inactive)
        )
    }
}

// ---------------------------------------------------------------------------
// SyncStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn can_transition_to(&self, target: &SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, target),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, Pending)
                | (Completed, Pending)
        )
    }
}

// ---------------------------------------------------------------------------
// DeviceType / Runtime
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRuntime {
    Cuda,
    Hip,
    OpenCl,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub api_key_hash: String,
    pub hostname: String,
    pub status: AgentStatus,
    pub sync_status: SyncStatus,
    pub busy: bool,
    pub current_task_id: Option<Uuid>,
    pub binary_version: String,
    pub schedule_window: Option<serde_json::Value>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: i64, api_key_hash: impl Into<String>, hostname: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            api_key_hash: api_key_hash.into(),
            hostname: hostname.into(),
            status: AgentStatus::Pending,
            sync_status: SyncStatus::Pending,
            busy: false,
            current_task_id: None,
            binary_version: "default".into(),
            schedule_window: None,
            last_heartbeat: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Precondition for receiving a task assignment (invariant 6).
    pub fn eligible_for_dispatch(&self) -> bool {
        self.status == AgentStatus::Active
            && self.sync_status == SyncStatus::Completed
            && !self.busy
    }
}

// ---------------------------------------------------------------------------
// PhysicalDevice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalDevice {
    pub id: Uuid,
    pub agent_id: i64,
    pub device_index: i32,
    pub device_type: DeviceType,
    pub enabled: bool,
    pub selected_runtime: Option<DeviceRuntime>,
    pub processors: Option<i32>,
    pub clock_mhz: Option<i32>,
    pub memory_mb: Option<i64>,
    pub pci_address: Option<String>,
}

// ---------------------------------------------------------------------------
// HashlistStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashlistStatus {
    Uploading,
    Processing,
    Ready,
    Error,
}

impl HashlistStatus {
    pub fn can_transition_to(&self, target: &HashlistStatus) -> bool {
        use HashlistStatus::*;
        matches!(
            (self, target),
            (Uploading, Processing) | (Processing, Ready) | (Processing, Error)
        )
    }

    /// Content may only change before `Ready`.
    pub fn is_mutable(&self) -> bool {
        !matches!(self, HashlistStatus::Ready)
    }
}

// ---------------------------------------------------------------------------
// Hashlist
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashlist {
    pub id: Uuid,
    pub name: String,
    pub client: Option<String>,
    pub hash_type_id: i32,
    pub total_hashes: i64,
    pub cracked_hashes: i64,
    pub status: HashlistStatus,
    pub exclude_from_potfile: bool,
    /// Linked partner hashlist for LM<->NTLM pairs (directed, uniqueness
    /// enforced on the unordered pair at the store layer).
    pub linked_hashlist_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Hash
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hash {
    pub id: Uuid,
    pub original_hash: String,
    pub hash_value: String,
    pub username: Option<String>,
    pub domain: Option<String>,
    pub is_cracked: bool,
    pub password: Option<String>,
    pub cracked_by_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AttackMode / IncrementMode / SplitMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackMode {
    Dictionary = 0,
    Combinator = 1,
    Mask = 3,
    HybridDictMask = 6,
    HybridMaskDict = 7,
    Association = 9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementMode {
    None,
    Increment,
    IncrementInverse,
}

/// The sum type the planner returns; the task-creator materializes it into
/// `JobTask` rows without re-deciding the split (§9 "model as tagged variants").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SplitMode {
    RuleSplit { rule_subrange: (i64, i64) },
    IncrementLayer { layer_index: i32 },
    KeyspaceSplit { skip: i64, limit: i64 },
}

// ---------------------------------------------------------------------------
// PresetJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetJob {
    pub id: Uuid,
    pub name: String,
    pub attack_mode: AttackMode,
    pub wordlists: Vec<String>,
    pub rules: Vec<String>,
    pub mask: Option<String>,
    pub increment_mode: IncrementMode,
    pub increment_min: Option<i32>,
    pub increment_max: Option<i32>,
    pub base_keyspace: Option<i64>,
    pub effective_keyspace: Option<i64>,
    pub is_accurate_keyspace: bool,
    pub use_rule_splitting: bool,
    pub multiplication_factor: i64,
    pub max_agents: i32,
    pub priority: i32,
    pub chunk_size_seconds: i64,
    pub binary_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PresetJob {
    pub fn new(name: impl Into<String>, attack_mode: AttackMode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            attack_mode,
            wordlists: Vec::new(),
            rules: Vec::new(),
            mask: None,
            increment_mode: IncrementMode::None,
            increment_min: None,
            increment_max: None,
            base_keyspace: None,
            effective_keyspace: None,
            is_accurate_keyspace: false,
            use_rule_splitting: false,
            multiplication_factor: 1,
            max_agents: 1,
            priority: 0,
            chunk_size_seconds: 1200,
            binary_version: "default".into(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// JobExecutionStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobExecutionStatus {
    Pending,
    Running,
    Paused,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobExecutionStatus {
    pub fn can_transition_to(&self, target: &JobExecutionStatus) -> bool {
        use JobExecutionStatus::*;
        matches!(
            (self, target),
            (Pending, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (_, Cancelled)
                | (Running, Failed)
                | (Pending, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobExecutionStatus::Completed | JobExecutionStatus::Failed | JobExecutionStatus::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// JobExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub preset_job_id: Uuid,
    pub hashlist_id: Uuid,
    pub status: JobExecutionStatus,
    pub base_keyspace: i64,
    pub effective_keyspace: i64,
    pub is_accurate_keyspace: bool,
    pub dispatched_keyspace: i64,
    pub processed_keyspace: i64,
    pub priority: i32,
    pub max_agents: i32,
    pub interrupted_by: Option<Uuid>,
    pub failure_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobExecution {
    pub fn new(preset_job_id: Uuid, hashlist_id: Uuid, base_keyspace: i64, max_agents: i32, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            preset_job_id,
            hashlist_id,
            status: JobExecutionStatus::Pending,
            base_keyspace,
            effective_keyspace: base_keyspace,
            is_accurate_keyspace: false,
            dispatched_keyspace: 0,
            processed_keyspace: 0,
            priority,
            max_agents,
            interrupted_by: None,
            failure_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Invariant 2: processed <= dispatched <= effective.
    pub fn keyspace_invariant_holds(&self) -> bool {
        self.processed_keyspace <= self.dispatched_keyspace
            && self.dispatched_keyspace <= self.effective_keyspace
    }
}

// ---------------------------------------------------------------------------
// JobIncrementLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIncrementLayer {
    pub id: Uuid,
    pub job_execution_id: Uuid,
    pub layer_index: i32,
    pub mask_length: i32,
    pub status: JobExecutionStatus,
    pub base_keyspace: i64,
    pub effective_keyspace: i64,
    pub dispatched_keyspace: i64,
    pub processed_keyspace: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// JobTaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTaskStatus {
    Pending,
    Assigned,
    ReconnectPending,
    Running,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobTaskStatus {
    /// Returns `true` when a transition from `self` to `target` is valid, per
    /// C6/C7/C8's combined dispatch/progress/recovery protocol.
    pub fn can_transition_to(&self, target: &JobTaskStatus) -> bool {
        use JobTaskStatus::*;
        matches!(
            (self, target),
            (Pending, Assigned)
                | (Assigned, Running)
                | (Assigned, Pending) // send-buffer-full revert, §4.6 step 6
                | (Running, Processing)
                | (Running, ReconnectPending)
                | (Processing, ReconnectPending)
                | (Processing, Completed)
                | (Processing, Failed)
                | (ReconnectPending, Running) // reconnect with matching task
                | (ReconnectPending, Pending) // grace expiry
                | (_, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobTaskStatus::Completed | JobTaskStatus::Failed | JobTaskStatus::Cancelled)
    }

    /// At most one task per agent may be in one of these statuses (invariant 4).
    pub fn holds_agent_slot(&self) -> bool {
        matches!(
            self,
            JobTaskStatus::Assigned | JobTaskStatus::Running | JobTaskStatus::Processing | JobTaskStatus::ReconnectPending
        )
    }
}

// ---------------------------------------------------------------------------
// JobTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTask {
    pub id: Uuid,
    pub job_execution_id: Uuid,
    pub layer_id: Option<Uuid>,
    pub agent_id: Option<i64>,
    pub status: JobTaskStatus,
    pub keyspace_start: i64,
    pub keyspace_end: i64,
    pub effective_keyspace: i64,
    pub keyspace_processed: i64,
    pub progress_percent: f32,
    pub hash_rate: i64,
    pub detected_crack_count: i32,
    pub expected_crack_count: Option<i32>,
    pub received_crack_count: i32,
    pub batches_complete_signaled: bool,
    pub retransmit_count: i32,
    pub is_keyspace_split: bool,
    pub binary_version_id: Option<Uuid>,
    pub cracking_completed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stop_id: Option<Uuid>,
    pub reconnect_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobTask {
    pub fn new(job_execution_id: Uuid, keyspace_start: i64, keyspace_end: i64, is_keyspace_split: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_execution_id,
            layer_id: None,
            agent_id: None,
            status: JobTaskStatus::Pending,
            keyspace_start,
            keyspace_end,
            effective_keyspace: keyspace_end - keyspace_start,
            keyspace_processed: 0,
            progress_percent: 0.0,
            hash_rate: 0,
            detected_crack_count: 0,
            expected_crack_count: None,
            received_crack_count: 0,
            batches_complete_signaled: false,
            retransmit_count: 0,
            is_keyspace_split,
            binary_version_id: None,
            cracking_completed_at: None,
            completed_at: None,
            stop_id: None,
            reconnect_deadline: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// §4.7: the task becomes `completed` only once both counts match and
    /// batch completion was signaled (the "both, else timeout" resolution
    /// of the ambiguity noted in the design notes).
    pub fn crack_accounting_complete(&self) -> bool {
        self.batches_complete_signaled
            && self.expected_crack_count.map(|e| e == self.received_crack_count).unwrap_or(false)
    }

    /// Invariant 1: disjoint, in-range keyspace interval.
    pub fn keyspace_range(&self) -> (i64, i64) {
        (self.keyspace_start, self.keyspace_end)
    }
}

// ---------------------------------------------------------------------------
// AgentBenchmark / BenchmarkRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBenchmark {
    pub id: Uuid,
    pub agent_id: i64,
    pub attack_mode: AttackMode,
    pub hash_type_id: i32,
    pub salt_count: Option<i32>,
    pub candidates_per_sec: i64,
    pub measured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkRequestStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRequest {
    pub id: Uuid,
    pub agent_id: i64,
    pub attack_mode: AttackMode,
    pub hash_type_id: i32,
    pub salt_count: Option<i32>,
    pub status: BenchmarkRequestStatus,
    pub ineligible_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ClaimVoucher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimVoucher {
    pub id: Uuid,
    pub token_hash: String,
    pub issued_hostname_constraint: Option<String>,
    pub single_use: bool,
    pub consumed_at: Option<DateTime<Utc>>,
    pub consumed_by_agent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ClaimVoucher {
    pub fn is_available(&self) -> bool {
        self.consumed_at.is_none() && self.expires_at.map(|e| e > Utc::now()).unwrap_or(true)
    }
}
