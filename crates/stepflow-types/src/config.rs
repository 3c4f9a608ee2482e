//! Configuration types for stepflow.
//!
//! `StepflowConfig` represents the top-level `stepflow.toml`: where the store
//! lives and how a worker polls, leases and heartbeats. All fields have
//! defaults so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepflowConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL. `None` resolves to the default data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Worker tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Namespace the worker polls.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Stable worker identity. A fresh UUIDv7 is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    /// Maximum number of executions running at once in this worker.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// How long an acquired lease stays live without a heartbeat.
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,

    #[serde(default = "default_cron_interval_ms")]
    pub cron_interval_ms: u64,

    /// Maximum due cron jobs handled per cron tick.
    #[serde(default = "default_cron_batch_size")]
    pub cron_batch_size: u32,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_concurrency() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_lease_duration_ms() -> u64 {
    30_000
}

fn default_cron_interval_ms() -> u64 {
    10_000
}

fn default_cron_batch_size() -> u32 {
    100
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            worker_id: None,
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            lease_duration_ms: default_lease_duration_ms(),
            cron_interval_ms: default_cron_interval_ms(),
            cron_batch_size: default_cron_batch_size(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn cron_interval(&self) -> Duration {
        Duration::from_millis(self.cron_interval_ms)
    }

    /// Check the invariants a worker cannot run without.
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.namespace.trim().is_empty() {
            return Err("namespace must not be empty".to_string());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 || self.cron_interval_ms == 0 {
            return Err("poll and cron intervals must be positive".to_string());
        }
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat interval must be positive".to_string());
        }
        if self.heartbeat_interval_ms >= self.lease_duration_ms {
            return Err(format!(
                "heartbeat interval ({}ms) must be shorter than the lease duration ({}ms)",
                self.heartbeat_interval_ms, self.lease_duration_ms
            ));
        }
        Ok(())
    }
}
