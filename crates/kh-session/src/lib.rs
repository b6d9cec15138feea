//! Session Gateway (C3): the per-agent connection state machine.
//!
//! Tracks one agent connection from the moment its WebSocket upgrades
//! through authentication, device/file sync, steady-state dispatch, and
//! disconnect. The wire protocol and per-agent outbox live in `kh-bridge`;
//! this crate owns only the state transitions and their invariants.

pub mod session;

pub use session::{AgentSession, SessionError, SessionEvent, SessionState};
