//! Core orchestration logic for stepflow.
//!
//! Hosts the persistence port ([`store::Store`]), the payload codec, the
//! five-field cron scheduler, the durable step primitives and the
//! engine/worker pair that drive executions. Infrastructure-agnostic: the
//! SQLite implementation of the store lives in `stepflow-infra`.

pub mod cron;
pub mod engine;
pub mod marshal;
pub mod store;
pub mod worker;
pub mod workflow;
