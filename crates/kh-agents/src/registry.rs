//! Agent Registry (C2): tracks each connected agent's session state machine
//! alongside the persistent store.
//!
//! The operator-facing roster, voucher minting, and voucher redemption live
//! in `kh-bridge::http_api::agents` (a thin HTTP layer over the store
//! directly). This registry is the daemon-side consumer: it listens to
//! `kh-bridge`'s event bus for connection lifecycle events and keeps one
//! [`AgentSession`] per currently-known agent in sync with them, so the
//! scheduler and recovery controller can ask "is this agent actually ready"
//! without re-deriving it from raw store rows.

use dashmap::DashMap;

use kh_bridge::protocol::BridgeEvent;
use kh_core::store::{Store, StoreError};
use kh_core::types::{Agent, AgentStatus};
use kh_session::{AgentSession, SessionError, SessionEvent, SessionState};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent {0} has no tracked session")]
    NotTracked(i64),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Live session-state tracker for every agent the gateway has seen since
/// this process started. Entries are created on first contact and removed
/// on a clean disconnect; a sweep by [`crate::recovery::RecoveryController`]
/// reclaims anything left dangling by an unclean one.
pub struct AgentRegistry {
    store: Store,
    sessions: DashMap<i64, AgentSession>,
}

impl AgentRegistry {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
        }
    }

    /// Begin tracking a newly connected agent. Idempotent: reconnecting
    /// before the old entry was evicted just resets it to `Connecting`.
    pub fn track(&self, agent_id: i64) {
        self.sessions.insert(agent_id, AgentSession::new(agent_id));
    }

    pub fn untrack(&self, agent_id: i64) {
        self.sessions.remove(&agent_id);
    }

    pub fn session_state(&self, agent_id: i64) -> Option<SessionState> {
        self.sessions.get(&agent_id).map(|s| s.state())
    }

    pub fn is_ready(&self, agent_id: i64) -> bool {
        self.sessions.get(&agent_id).map(|s| s.is_ready()).unwrap_or(false)
    }

    /// Drive one agent's session state machine forward.
    pub fn apply_event(&self, agent_id: i64, event: SessionEvent) -> Result<SessionState, RegistryError> {
        let mut session = self.sessions.get_mut(&agent_id).ok_or(RegistryError::NotTracked(agent_id))?;
        Ok(session.apply(event)?)
    }

    /// Fold a bridge event into the tracked session, where one applies.
    /// Job/task/crack events don't carry agent-connection meaning and are
    /// ignored here; the dashboard event stream handles those directly.
    pub fn handle_bridge_event(&self, event: &BridgeEvent) {
        if let BridgeEvent::AgentStatusChanged { agent_id, status } = event {
            if matches!(status, AgentStatus::Inactive | AgentStatus::Disabled | AgentStatus::Error) {
                self.untrack(*agent_id);
            }
        }
    }

    /// Promote a freshly claimed agent from `pending` to `active` once its
    /// operator approves it (or an auto-approval policy does). A no-op
    /// error if the agent isn't currently `pending`.
    pub async fn activate(&self, agent_id: i64) -> Result<Agent, RegistryError> {
        self.store.set_agent_status(agent_id, AgentStatus::Pending, AgentStatus::Active).await?;
        Ok(self.store.get_agent(agent_id).await?)
    }

    /// Candidate agents for dispatch (§4.6 step 1), passed straight through
    /// to the store — kept here so the scheduler depends on one registry
    /// type rather than reaching into `kh-core` directly for this query.
    pub async fn dispatch_candidates(&self) -> Result<Vec<Agent>, RegistryError> {
        Ok(self.store.list_dispatch_candidates().await?)
    }

    pub fn tracked_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        // Constructing a real `Store` requires a pool; the registry tests
        // below only exercise the in-memory session tracking, which doesn't
        // touch `self.store`, so a lazily-connecting pool is fine to build
        // but never call into.
        Store::from_pool(sqlx::PgPool::connect_lazy("postgres://invalid/invalid").expect("lazy pool construction"))
    }

    #[test]
    fn track_and_apply_drives_the_session_machine() {
        let registry = AgentRegistry::new(test_store());
        registry.track(1);
        assert_eq!(registry.session_state(1), Some(SessionState::Connecting));

        registry.apply_event(1, SessionEvent::Authenticated).unwrap();
        registry.apply_event(1, SessionEvent::SyncStarted).unwrap();
        registry.apply_event(1, SessionEvent::DeviceDetectionOk).unwrap();
        registry.apply_event(1, SessionEvent::FileSyncOk).unwrap();
        assert!(registry.is_ready(1));
    }

    #[test]
    fn untracked_agent_is_not_ready() {
        let registry = AgentRegistry::new(test_store());
        assert!(!registry.is_ready(42));
        assert!(matches!(registry.apply_event(42, SessionEvent::Authenticated), Err(RegistryError::NotTracked(42))));
    }

    #[test]
    fn untrack_removes_the_session() {
        let registry = AgentRegistry::new(test_store());
        registry.track(7);
        assert_eq!(registry.tracked_count(), 1);
        registry.untrack(7);
        assert_eq!(registry.tracked_count(), 0);
        assert_eq!(registry.session_state(7), None);
    }
}
