//! Agent Registry (C2) and Recovery Controller (C8).
//!
//! `registry` tracks each connected agent's [`kh_session::SessionState`]
//! alongside the persistent store, bridging connection-lifecycle events
//! (from `kh-bridge`'s event bus) to the session state machine. `recovery`
//! is the periodic sweep that reclaims tasks and agent slots left behind by
//! connections that never got a clean disconnect.

pub mod recovery;
pub mod registry;

pub use recovery::{RecoveryController, RecoverySweepReport};
pub use registry::{AgentRegistry, RegistryError};
