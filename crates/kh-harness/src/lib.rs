//! Reliability infrastructure shared by KrakenHashes services.
//!
//! This crate provides the operational plumbing every long-running
//! component (server, daemon, CLI) links against:
//! - Circuit breaker for calls to flaky downstream dependencies (agent
//!   HTTP pushes, external integrations)
//! - Token-bucket rate limiting for the HTTP/WS edge
//! - Input sanitization for user-supplied text (hashlist names, client
//!   labels, preset job names)
//! - Graceful shutdown coordination across background loops

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod security;
pub mod shutdown;
