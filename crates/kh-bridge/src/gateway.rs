//! Per-agent WebSocket session registry.
//!
//! Each connected agent gets one [`AgentHandle`]: a bounded outbox the
//! dispatcher/ingest layers push onto, and a request/response correlation
//! table for the handful of messages that expect a reply (benchmark
//! requests, current-task-status queries). The registry itself never talks
//! to Postgres — callers in `kh-scheduler`/`kh-ingest` own that.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use kh_core::config::GatewayConfig;

use crate::protocol::AgentMessage;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("agent {0} is not connected")]
    NotConnected(i64),
    #[error("outbox full for agent {0}, message dropped")]
    OutboxFull(i64),
    #[error("request timed out waiting for agent reply")]
    Timeout,
}

/// One entry per live WebSocket connection.
struct AgentHandle {
    outbox: mpsc::Sender<AgentMessage>,
    pending: Arc<RwLock<AHashMap<Uuid, oneshot::Sender<AgentMessage>>>>,
}

/// Registry of all currently-connected agent sessions.
///
/// Cloned cheaply (wraps a [`DashMap`] in an `Arc`-free shared map) and
/// handed to every component that needs to push a message to an agent:
/// the scheduler dispatching tasks, the ingest layer acking batches, the
/// recovery controller requesting state sync.
#[derive(Clone)]
pub struct GatewayRegistry {
    sessions: Arc<DashMap<i64, AgentHandle>>,
    config: GatewayConfig,
}

impl GatewayRegistry {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Register a freshly-authenticated agent connection and return the
    /// receiving half of its outbox, which the connection's writer task
    /// drains and forwards over the socket.
    pub fn register(&self, agent_id: i64) -> mpsc::Receiver<AgentMessage> {
        let (tx, rx) = mpsc::channel(self.config.outbox_capacity);
        self.sessions.insert(
            agent_id,
            AgentHandle {
                outbox: tx,
                pending: Arc::new(RwLock::new(AHashMap::new())),
            },
        );
        rx
    }

    /// Drop an agent's session, e.g. on socket close or ping timeout.
    pub fn unregister(&self, agent_id: i64) {
        self.sessions.remove(&agent_id);
    }

    pub fn is_connected(&self, agent_id: i64) -> bool {
        self.sessions.contains_key(&agent_id)
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.len()
    }

    /// Enqueue a message for delivery. Non-blocking: if the outbox is full
    /// the message is dropped and [`GatewayError::OutboxFull`] is returned
    /// rather than backpressuring the caller indefinitely.
    pub fn send(&self, agent_id: i64, msg: AgentMessage) -> Result<(), GatewayError> {
        let handle = self
            .sessions
            .get(&agent_id)
            .ok_or(GatewayError::NotConnected(agent_id))?;
        handle
            .outbox
            .try_send(msg)
            .map_err(|_| GatewayError::OutboxFull(agent_id))
    }

    /// Send a message and wait for the matching reply, correlated by
    /// `request_id`. The connection's reader task calls [`Self::resolve`]
    /// when a reply with that id arrives.
    pub async fn send_and_wait(
        &self,
        agent_id: i64,
        request_id: Uuid,
        msg: AgentMessage,
        timeout: Duration,
    ) -> Result<AgentMessage, GatewayError> {
        let pending = {
            let handle = self
                .sessions
                .get(&agent_id)
                .ok_or(GatewayError::NotConnected(agent_id))?;
            handle.pending.clone()
        };

        let (tx, rx) = oneshot::channel();
        pending.write().await.insert(request_id, tx);

        if let Err(e) = self.send(agent_id, msg) {
            pending.write().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                pending.write().await.remove(&request_id);
                Err(GatewayError::Timeout)
            }
        }
    }

    /// Called by a connection's reader task when a reply correlated to
    /// `request_id` arrives. Returns `false` if nothing was waiting (the
    /// request already timed out, or this wasn't a correlated reply).
    pub async fn resolve(&self, agent_id: i64, request_id: Uuid, reply: AgentMessage) -> bool {
        let Some(handle) = self.sessions.get(&agent_id) else {
            return false;
        };
        let pending = handle.pending.clone();
        drop(handle);
        if let Some(tx) = pending.write().await.remove(&request_id) {
            let _ = tx.send(reply);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_send() {
        let reg = GatewayRegistry::new(GatewayConfig::default());
        let mut rx = reg.register(1);
        reg.send(1, AgentMessage::Ping).unwrap();
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, AgentMessage::Ping));
    }

    #[test]
    fn send_to_unknown_agent_errors() {
        let reg = GatewayRegistry::new(GatewayConfig::default());
        let result = reg.send(99, AgentMessage::Ping);
        assert!(matches!(result, Err(GatewayError::NotConnected(99))));
    }

    #[tokio::test]
    async fn unregister_drops_session() {
        let reg = GatewayRegistry::new(GatewayConfig::default());
        let _rx = reg.register(1);
        assert!(reg.is_connected(1));
        reg.unregister(1);
        assert!(!reg.is_connected(1));
    }

    #[tokio::test]
    async fn outbox_full_drops_message() {
        let mut cfg = GatewayConfig::default();
        cfg.outbox_capacity = 1;
        let reg = GatewayRegistry::new(cfg);
        let _rx = reg.register(1);
        reg.send(1, AgentMessage::Ping).unwrap();
        let result = reg.send(1, AgentMessage::Ping);
        assert!(matches!(result, Err(GatewayError::OutboxFull(1))));
    }

    #[tokio::test]
    async fn send_and_wait_resolves_on_reply() {
        let reg = GatewayRegistry::new(GatewayConfig::default());
        let mut rx = reg.register(1);
        let request_id = Uuid::new_v4();

        let reg2 = reg.clone();
        let waiter = tokio::spawn(async move {
            reg2.send_and_wait(
                1,
                request_id,
                AgentMessage::CurrentTaskStatusRequest,
                Duration::from_secs(5),
            )
            .await
        });

        let _sent = rx.recv().await.unwrap();
        let resolved = reg
            .resolve(
                1,
                request_id,
                AgentMessage::CurrentTaskStatusResponse {
                    task_id: None,
                    status: None,
                },
            )
            .await;
        assert!(resolved);

        let reply = waiter.await.unwrap().unwrap();
        assert!(matches!(reply, AgentMessage::CurrentTaskStatusResponse { .. }));
    }

    #[tokio::test]
    async fn send_and_wait_times_out() {
        let reg = GatewayRegistry::new(GatewayConfig::default());
        let _rx = reg.register(1);
        let result = reg
            .send_and_wait(
                1,
                Uuid::new_v4(),
                AgentMessage::CurrentTaskStatusRequest,
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(GatewayError::Timeout)));
    }
}
