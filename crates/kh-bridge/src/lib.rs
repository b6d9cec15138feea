//! Bridge layer between the KrakenHashes server and the outside world.
//!
//! This crate owns everything that touches a socket:
//! - [`gateway`] — the per-agent WebSocket session map, outbox, and
//!   ping/pong keepalive that every connected agent rides on
//! - [`http_api`] — the Axum router (agent-facing file/hashlist downloads
//!   plus the operator-facing REST surface)
//! - [`auth`] — API key authentication middleware
//! - [`rate_limit_middleware`] / [`origin_validation`] — request-edge hardening
//! - [`event_bus`] — pub/sub fan-out of job/agent state changes to admin consumers
//! - [`protocol`] — the wire message taxonomy agents and the server exchange
//! - [`filesync`] — manifest diff and throttled download dispatch for agent
//!   wordlist/rule/binary inventories

pub mod api_error;
pub mod auth;
pub mod event_bus;
pub mod filesync;
pub mod gateway;
pub mod http_api;
pub mod ingest;
pub mod json_response;
pub mod origin_validation;
pub mod protocol;
pub mod rate_limit_middleware;
