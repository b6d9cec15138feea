//! File sync (C4): reconciles each agent's local wordlist/rule/binary
//! inventory against the authoritative manifest and throttles the resulting
//! downloads through the agent's WebSocket connection.
//!
//! The server never transfers file bytes itself; `SyncCommand` only ever
//! carries a `download_url` the agent fetches on its own (typically the
//! static file server fronting the resource directory). This module's job is
//! purely the manifest diff and the per-agent download queue.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::gateway::{GatewayError, GatewayRegistry};
use crate::protocol::{AgentMessage, SyncFileManifestEntry};

#[derive(Debug, thiserror::Error)]
pub enum FileSyncError {
    #[error("io error scanning resource root: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// The authoritative set of files every agent is expected to hold, scanned
/// from the resource directory the server serves over HTTP. One category per
/// top-level subdirectory (`wordlists/`, `rules/`, `binaries/`, ...).
#[derive(Debug, Clone, Default)]
pub struct SyncManifest {
    pub entries: Vec<SyncFileManifestEntry>,
}

impl SyncManifest {
    /// Recursively hash every regular file under `root`, one directory level
    /// deep for the category label.
    pub fn scan(root: &Path) -> Result<Self, FileSyncError> {
        let mut entries = Vec::new();
        if !root.exists() {
            return Ok(Self { entries });
        }
        for category_entry in std::fs::read_dir(root)? {
            let category_entry = category_entry?;
            if !category_entry.file_type()?.is_dir() {
                continue;
            }
            let category = category_entry.file_name().to_string_lossy().into_owned();
            for file_entry in std::fs::read_dir(category_entry.path())? {
                let file_entry = file_entry?;
                if !file_entry.file_type()?.is_file() {
                    continue;
                }
                let bytes = std::fs::read(file_entry.path())?;
                let size_bytes = bytes.len() as u64;
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let sha256 = hex_encode(&hasher.finalize());
                entries.push(SyncFileManifestEntry {
                    name: file_entry.file_name().to_string_lossy().into_owned(),
                    category: category.clone(),
                    sha256,
                    size_bytes,
                });
            }
        }
        Ok(Self { entries })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").ok();
    }
    out
}

struct AgentQueue {
    pending: VecDeque<SyncFileManifestEntry>,
    in_flight: HashSet<Uuid>,
    file_ids: std::collections::HashMap<Uuid, SyncFileManifestEntry>,
}

/// Per-agent download throttling over the manifest diff. One instance is
/// shared across every agent connection handled by the gateway.
pub struct FileSyncController {
    queues: DashMap<i64, AgentQueue>,
    base_url: String,
    max_concurrent: u32,
}

impl FileSyncController {
    pub fn new(base_url: impl Into<String>, max_concurrent: u32) -> Self {
        Self {
            queues: DashMap::new(),
            base_url: base_url.into(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    fn download_url(&self, entry: &SyncFileManifestEntry) -> String {
        format!("{}/{}/{}", self.base_url.trim_end_matches('/'), entry.category, entry.name)
    }

    /// Reply to an agent's `SyncRequest` with the full manifest, then start
    /// dispatching `SyncCommand`s up to the concurrency cap.
    pub fn begin_sync(&self, agent_id: i64, manifest: &SyncManifest, gateway: &GatewayRegistry) -> Result<(), FileSyncError> {
        gateway.send(
            agent_id,
            AgentMessage::SyncResponse {
                files: manifest.entries.clone(),
            },
        )?;

        let mut queue = AgentQueue {
            pending: manifest.entries.iter().cloned().collect(),
            in_flight: HashSet::new(),
            file_ids: std::collections::HashMap::new(),
        };
        for entry in &manifest.entries {
            queue.file_ids.insert(Uuid::new_v4(), entry.clone());
        }
        // Rebuild pending from the id-keyed map so in-flight bookkeeping can
        // key on file_id rather than re-deriving it from the entry.
        queue.pending = queue.file_ids.values().cloned().collect();
        self.queues.insert(agent_id, queue);
        self.dispatch_next(agent_id, gateway)
    }

    fn dispatch_next(&self, agent_id: i64, gateway: &GatewayRegistry) -> Result<(), FileSyncError> {
        let Some(mut queue) = self.queues.get_mut(agent_id) else {
            return Ok(());
        };
        while queue.in_flight.len() < self.max_concurrent as usize {
            let Some(entry) = queue.pending.pop_front() else {
                break;
            };
            let Some((file_id, _)) = queue.file_ids.iter().find(|(_, e)| e.name == entry.name && e.category == entry.category) else {
                continue;
            };
            let file_id = *file_id;
            queue.in_flight.insert(file_id);
            gateway.send(
                agent_id,
                AgentMessage::SyncCommand {
                    file_id,
                    download_url: self.download_url(&entry),
                    expected_sha256: entry.sha256.clone(),
                },
            )?;
        }
        Ok(())
    }

    /// Returns `true` once every file in this agent's manifest has either
    /// completed or permanently failed and nothing remains queued.
    pub fn handle_download_complete(
        &self,
        agent_id: i64,
        file_id: Uuid,
        sha256: &str,
        gateway: &GatewayRegistry,
    ) -> Result<bool, FileSyncError> {
        if let Some(mut queue) = self.queues.get_mut(agent_id) {
            if let Some(expected) = queue.file_ids.get(&file_id) {
                if expected.sha256 != sha256 {
                    tracing::warn!(agent_id, %file_id, "downloaded file sha256 mismatch, re-queueing");
                    let entry = expected.clone();
                    queue.in_flight.remove(&file_id);
                    queue.pending.push_back(entry);
                } else {
                    queue.in_flight.remove(&file_id);
                }
            }
        }
        self.dispatch_next(agent_id, gateway)?;
        Ok(self.is_drained(agent_id))
    }

    pub fn handle_download_failed(&self, agent_id: i64, file_id: Uuid, error: &str, gateway: &GatewayRegistry) -> Result<bool, FileSyncError> {
        tracing::warn!(agent_id, %file_id, error, "agent reported download failure, re-queueing");
        if let Some(mut queue) = self.queues.get_mut(agent_id) {
            if let Some(entry) = queue.file_ids.get(&file_id).cloned() {
                queue.in_flight.remove(&file_id);
                queue.pending.push_back(entry);
            }
        }
        self.dispatch_next(agent_id, gateway)?;
        Ok(self.is_drained(agent_id))
    }

    fn is_drained(&self, agent_id: i64) -> bool {
        self.queues
            .get(&agent_id)
            .map(|q| q.pending.is_empty() && q.in_flight.is_empty())
            .unwrap_or(true)
    }

    pub fn forget(&self, agent_id: i64) {
        self.queues.remove(&agent_id);
    }
}
