//! Shared domain types for stepflow.
//!
//! The persisted entities of the orchestrator (executions, steps, leases and
//! cron jobs), their status enums, the storage error taxonomy and the
//! configuration types loaded from `stepflow.toml`.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod clock;
pub mod config;
pub mod cron;
pub mod error;
pub mod execution;
pub mod lease;
pub mod step;
