use chrono::{DateTime, Utc};

/// Connection lifecycle of one agent's WebSocket session (§4.3).
///
/// `Ready` is only reachable from `Syncing` once both device detection and
/// file sync have completed; either can arrive first, but neither alone is
/// enough. `Degraded` covers a connection that is still open but has lost
/// one of those preconditions (e.g. a mid-session device re-scan) without
/// dropping the socket outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticating,
    Syncing,
    Ready,
    Degraded,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated,
    SyncStarted,
    DeviceDetectionOk,
    FileSyncOk,
    Degrade,
    Recover,
    Close,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot apply {event:?} to a session in {state:?}")]
    InvalidTransition { state: SessionState, event: SessionEvent },
}

/// One agent's connection, tracked from upgrade to teardown. Owned by the
/// gateway alongside the per-agent outbox; every state change is timestamped
/// so the full lifecycle of a connection can be reconstructed for recovery
/// or diagnostics.
#[derive(Debug)]
pub struct AgentSession {
    pub agent_id: i64,
    state: SessionState,
    device_detection_ok: bool,
    file_sync_ok: bool,
    history: Vec<(SessionState, DateTime<Utc>)>,
}

impl AgentSession {
    pub fn new(agent_id: i64) -> Self {
        Self {
            agent_id,
            state: SessionState::Connecting,
            device_detection_ok: false,
            file_sync_ok: false,
            history: vec![(SessionState::Connecting, Utc::now())],
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[(SessionState, DateTime<Utc>)] {
        &self.history
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Whether both sync preconditions are currently satisfied. Exposed so
    /// callers outside the `Syncing` state (e.g. `Degraded` recovery) can
    /// decide whether `Recover` would actually succeed before sending it.
    pub fn sync_preconditions_met(&self) -> bool {
        self.device_detection_ok && self.file_sync_ok
    }

    pub fn can_apply(&self, event: SessionEvent) -> bool {
        self.next_state(event).is_ok()
    }

    fn next_state(&self, event: SessionEvent) -> Result<SessionState, SessionError> {
        use SessionEvent::*;
        use SessionState::*;

        let next = match (self.state, event) {
            (Connecting, Authenticated) => Authenticating,
            (Authenticating, SyncStarted) => Syncing,
            (Syncing, DeviceDetectionOk) | (Syncing, FileSyncOk) => {
                let both = match event {
                    DeviceDetectionOk => self.file_sync_ok,
                    FileSyncOk => self.device_detection_ok,
                    _ => unreachable!(),
                };
                if both {
                    Ready
                } else {
                    Syncing
                }
            }
            (Ready, Degrade) => Degraded,
            (Degraded, Recover) if self.sync_preconditions_met() => Ready,
            (Connecting | Authenticating | Syncing | Ready | Degraded, Close) => Closing,
            (Closing, Closed) => Closed,
            _ => return Err(SessionError::InvalidTransition { state: self.state, event }),
        };
        Ok(next)
    }

    /// Apply an event, updating the readiness flags and recording history on
    /// any actual state change.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState, SessionError> {
        let next = self.next_state(event)?;

        match event {
            SessionEvent::DeviceDetectionOk => self.device_detection_ok = true,
            SessionEvent::FileSyncOk => self.file_sync_ok = true,
            SessionEvent::Degrade => {
                // A degrade mid-sync means at least one precondition no
                // longer holds; the next successful detection/sync event
                // re-establishes it before `Recover` is accepted.
                self.device_detection_ok = false;
                self.file_sync_ok = false;
            }
            _ => {}
        }

        if next != self.state {
            self.state = next;
            self.history.push((next, Utc::now()));
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_ready_only_after_both_preconditions() {
        let mut session = AgentSession::new(1);
        assert_eq!(session.apply(SessionEvent::Authenticated).unwrap(), SessionState::Authenticating);
        assert_eq!(session.apply(SessionEvent::SyncStarted).unwrap(), SessionState::Syncing);
        assert_eq!(session.apply(SessionEvent::DeviceDetectionOk).unwrap(), SessionState::Syncing);
        assert_eq!(session.apply(SessionEvent::FileSyncOk).unwrap(), SessionState::Ready);
    }

    #[test]
    fn order_of_preconditions_does_not_matter() {
        let mut session = AgentSession::new(1);
        session.apply(SessionEvent::Authenticated).unwrap();
        session.apply(SessionEvent::SyncStarted).unwrap();
        session.apply(SessionEvent::FileSyncOk).unwrap();
        assert_eq!(session.state(), SessionState::Syncing);
        assert_eq!(session.apply(SessionEvent::DeviceDetectionOk).unwrap(), SessionState::Ready);
    }

    #[test]
    fn degrade_then_recover_requires_preconditions_again() {
        let mut session = AgentSession::new(1);
        session.apply(SessionEvent::Authenticated).unwrap();
        session.apply(SessionEvent::SyncStarted).unwrap();
        session.apply(SessionEvent::DeviceDetectionOk).unwrap();
        session.apply(SessionEvent::FileSyncOk).unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        session.apply(SessionEvent::Degrade).unwrap();
        assert_eq!(session.state(), SessionState::Degraded);
        assert!(!session.can_apply(SessionEvent::Recover));

        session.apply(SessionEvent::DeviceDetectionOk).unwrap();
        session.apply(SessionEvent::FileSyncOk).unwrap();
        assert_eq!(session.apply(SessionEvent::Recover).unwrap(), SessionState::Ready);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut session = AgentSession::new(1);
        let err = session.apply(SessionEvent::FileSyncOk).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { state: SessionState::Connecting, .. }));
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn close_is_reachable_from_any_non_terminal_state() {
        for state in [SessionState::Connecting, SessionState::Authenticating, SessionState::Syncing, SessionState::Ready] {
            let mut session = AgentSession::new(1);
            match state {
                SessionState::Authenticating => {
                    session.apply(SessionEvent::Authenticated).unwrap();
                }
                SessionState::Syncing => {
                    session.apply(SessionEvent::Authenticated).unwrap();
                    session.apply(SessionEvent::SyncStarted).unwrap();
                }
                SessionState::Ready => {
                    session.apply(SessionEvent::Authenticated).unwrap();
                    session.apply(SessionEvent::SyncStarted).unwrap();
                    session.apply(SessionEvent::DeviceDetectionOk).unwrap();
                    session.apply(SessionEvent::FileSyncOk).unwrap();
                }
                _ => {}
            }
            assert_eq!(session.apply(SessionEvent::Close).unwrap(), SessionState::Closing);
            assert_eq!(session.apply(SessionEvent::Closed).unwrap(), SessionState::Closed);
        }
    }

    #[test]
    fn history_only_records_actual_transitions() {
        let mut session = AgentSession::new(1);
        session.apply(SessionEvent::Authenticated).unwrap();
        session.apply(SessionEvent::SyncStarted).unwrap();
        session.apply(SessionEvent::DeviceDetectionOk).unwrap();
        // Still in Syncing: no new history entry since the state didn't change.
        let len_before = session.history().len();
        assert_eq!(session.state(), SessionState::Syncing);
        assert_eq!(len_before, 3);
    }
}
