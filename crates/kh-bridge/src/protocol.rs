use kh_core::types::{
    AgentStatus, DeviceRuntime, DeviceType, JobExecutionStatus, JobTaskStatus, SplitMode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The full set of messages exchanged over an agent's persistent WebSocket
/// connection, plus the internal events the gateway republishes on the
/// [`crate::event_bus::EventBus`] for admin-facing consumers.
///
/// Agent-originated variants flow gateway-ward; server-originated variants
/// flow agent-ward. A single tagged enum keeps both directions in one wire
/// format, matching what a sniffed session actually looks like.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum AgentMessage {
    // ---- Keepalive --------------------------------------------------------
    Ping,
    Pong,

    // ---- Agent -> Server: registration & inventory -------------------------
    DeviceDetection {
        devices: Vec<DetectedDevice>,
    },
    PhysicalDeviceDetection {
        devices: Vec<DetectedPhysicalDevice>,
    },
    DeviceUpdate {
        device_index: i32,
        enabled: bool,
        selected_runtime: Option<DeviceRuntime>,
    },

    // ---- Server -> Agent: configuration & control --------------------------
    ConfigUpdate {
        schedule_window: Option<serde_json::Value>,
    },
    AgentShutdown {
        reason: String,
    },

    // ---- Binary/resource sync (C4) -----------------------------------------
    SyncRequest,
    SyncResponse {
        files: Vec<SyncFileManifestEntry>,
    },
    SyncCommand {
        file_id: Uuid,
        download_url: String,
        expected_sha256: String,
    },
    SyncStatusUpdate {
        status: String,
    },
    DownloadProgress {
        file_id: Uuid,
        bytes_received: u64,
        bytes_total: u64,
    },
    DownloadComplete {
        file_id: Uuid,
        sha256: String,
    },
    DownloadFailed {
        file_id: Uuid,
        error: String,
    },

    // ---- Benchmarking (C5 gate) ---------------------------------------------
    BenchmarkRequest {
        request_id: Uuid,
        attack_mode: i32,
        hash_type_id: i32,
        salt_count: Option<i32>,
    },
    BenchmarkResult {
        request_id: Uuid,
        hashes_per_second: f64,
        succeeded: bool,
        error: Option<String>,
    },

    // ---- Dispatch & execution (C6/C7) ---------------------------------------
    JobAssignment {
        task: TaskAssignment,
    },
    JobStatus {
        task_id: Uuid,
        status: String,
        keyspace_processed: i64,
        progress_percent: f64,
        hash_rate: Option<i64>,
        detected_crack_count: i32,
    },
    CrackBatch {
        task_id: Uuid,
        batch_number: i64,
        cracks: Vec<CrackedHash>,
    },
    BatchesComplete {
        task_id: Uuid,
    },
    JobStop {
        task_id: Uuid,
        stop_id: Uuid,
    },
    TaskStopAck {
        task_id: Uuid,
        stop_id: Uuid,
    },
    TaskCompleteAck {
        task_id: Uuid,
    },
    CurrentTaskStatusRequest,
    CurrentTaskStatusResponse {
        task_id: Option<Uuid>,
        status: Option<JobTaskStatus>,
    },
    PendingOutfiles {
        task_id: Uuid,
        outfile_names: Vec<String>,
    },
    OutfileDeleteRejected {
        task_id: Uuid,
        outfile_name: String,
        reason: String,
    },

    // ---- State reconciliation (C8) -------------------------------------------
    StateSyncRequest {
        last_known_task_id: Option<Uuid>,
    },
    StateSyncResponse {
        authoritative_task: Option<TaskAssignment>,
    },
    BufferedMessages {
        messages: Vec<Box<AgentMessage>>,
    },
    BufferAck {
        up_to_sequence: u64,
    },

    // ---- Debug / log streaming -------------------------------------------
    DebugToggle {
        enabled: bool,
    },
    DebugStatusReport {
        enabled: bool,
    },
    LogRequest {
        since_sequence: u64,
    },
    LogData {
        lines: Vec<String>,
        sequence: u64,
    },
    LogPurge,

    // ---- Errors -------------------------------------------------------------
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedDevice {
    pub device_type: DeviceType,
    pub name: String,
    pub available_runtimes: Vec<DeviceRuntime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPhysicalDevice {
    pub device_index: i32,
    pub device_type: DeviceType,
    pub processors: i32,
    pub clock_mhz: Option<i32>,
    pub memory_mb: Option<i64>,
    pub pci_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFileManifestEntry {
    pub name: String,
    pub category: String,
    pub sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: Uuid,
    pub job_execution_id: Uuid,
    pub hashlist_id: Uuid,
    pub attack_mode: i32,
    pub hash_type_id: i32,
    pub keyspace_start: i64,
    pub keyspace_end: i64,
    pub split: SplitMode,
    pub wordlist_names: Vec<String>,
    pub rule_names: Vec<String>,
    pub mask: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrackedHash {
    pub hash_value: String,
    pub plaintext: String,
    pub lm_half_index: Option<i16>,
}

// ---------------------------------------------------------------------------
// Internal event-bus payloads (admin/dashboard fan-out, not wire messages)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum BridgeEvent {
    AgentStatusChanged {
        agent_id: i64,
        status: AgentStatus,
    },
    JobStatusChanged {
        job_execution_id: Uuid,
        status: JobExecutionStatus,
    },
    TaskProgress {
        task_id: Uuid,
        progress_percent: f64,
    },
    HashCracked {
        hashlist_id: Uuid,
        hash_value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips() {
        let json = serde_json::to_string(&AgentMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
        let back: AgentMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, AgentMessage::Ping));
    }

    #[test]
    fn job_assignment_round_trips() {
        let msg = AgentMessage::JobAssignment {
            task: TaskAssignment {
                task_id: Uuid::new_v4(),
                job_execution_id: Uuid::new_v4(),
                hashlist_id: Uuid::new_v4(),
                attack_mode: 0,
                hash_type_id: 1000,
                keyspace_start: 0,
                keyspace_end: 1_000_000,
                split: SplitMode::KeyspaceSplit {
                    skip: 0,
                    limit: 1_000_000,
                },
                wordlist_names: vec!["rockyou.txt".into()],
                rule_names: vec![],
                mask: None,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: AgentMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, AgentMessage::JobAssignment { .. }));
    }

    #[test]
    fn bridge_event_tags_are_snake_case() {
        let json = serde_json::to_string(&BridgeEvent::HashCracked {
            hashlist_id: Uuid::new_v4(),
            hash_value: "deadbeef".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"hash_cracked\""));
    }
}
