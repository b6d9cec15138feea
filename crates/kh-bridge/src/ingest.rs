//! Forwarding channel for the Progress & Crack Ingestor (C7).
//!
//! `kh-ingest` depends on `kh-bridge` for the gateway/protocol types, so the
//! dependency can't run the other way: the WebSocket reader can't call into
//! `kh-ingest` directly. Instead it drops every progress/crack-batch frame
//! onto this channel; `kh-ingest` owns the receiving end and drains it from
//! its own worker task.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::CrackedHash;

#[derive(Debug, Clone)]
pub enum IngestEvent {
    JobStatus {
        agent_id: i64,
        task_id: Uuid,
        status: String,
        keyspace_processed: i64,
        progress_percent: f32,
        hash_rate: i64,
        detected_crack_count: i32,
    },
    CrackBatch {
        agent_id: i64,
        task_id: Uuid,
        batch_number: i64,
        cracks: Vec<CrackedHash>,
    },
    BatchesComplete {
        agent_id: i64,
        task_id: Uuid,
    },
}

pub type IngestSender = mpsc::Sender<IngestEvent>;
pub type IngestReceiver = mpsc::Receiver<IngestEvent>;

/// Default channel depth for the ingest forwarding queue.
pub const INGEST_CHANNEL_CAPACITY: usize = 1024;

pub fn channel() -> (IngestSender, IngestReceiver) {
    mpsc::channel(INGEST_CHANNEL_CAPACITY)
}
