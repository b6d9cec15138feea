//! Core library for KrakenHashes — durable domain types and the persistent
//! store (C1) that every other component reads and writes through.
//!
//! This crate provides:
//! - The domain model: agents, devices, hashlists, hashes, preset/execution
//!   jobs, tasks, benchmarks and claim vouchers.
//! - `store`: a Postgres-backed store exposing the atomic primitives other
//!   components build on (row-level claim, idempotent insert, constrained
//!   update) plus per-aggregate repositories.
//! - Configuration loading and API-key/voucher token handling.

pub mod apikey;
pub mod binary_version;
pub mod config;
pub mod store;
pub mod types;
