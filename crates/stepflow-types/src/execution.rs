//! Workflow execution records.
//!
//! One `WorkflowExecution` row exists per workflow run. It is created in
//! `Pending` state by the engine and mutated only by the worker that holds
//! the execution's lease.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a workflow execution.
///
/// ```text
/// pending -> running -> completed
///                    -> failed (retry scheduled) -> running ...
///                    -> failed (final)
///                    -> sleeping -> running ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Sleeping,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// The lowercase string stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Sleeping => "sleeping",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "sleeping" => Ok(ExecutionStatus::Sleeping),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// A single run of a named workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 execution ID (also the lease resource ID).
    pub id: Uuid,
    /// Name the workflow was registered under.
    pub workflow_name: String,
    /// Tenant / isolation partition.
    pub namespace: String,
    pub status: ExecutionStatus,
    /// Marshalled workflow input.
    pub input_data: Vec<u8>,
    /// Marshalled workflow output, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Vec<u8>>,
    pub max_attempts: u32,
    /// Only ever decreases.
    pub remaining_attempts: u32,
    /// When a failed execution becomes eligible again. `None` on a failed
    /// execution means the failure is final.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Wake time; only set while `status == Sleeping`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_until: Option<DateTime<Utc>>,
    /// Upper bound on a single attempt, in milliseconds.
    pub timeout_ms: u64,
    /// Base delay for exponential retry backoff, in milliseconds.
    pub retry_backoff_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl WorkflowExecution {
    /// Whether this execution has reached `completed` or `failed(final)`.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            ExecutionStatus::Completed => true,
            ExecutionStatus::Failed => self.next_retry_at.is_none(),
            _ => false,
        }
    }

    /// Whether a worker may try to lease this execution at `now`.
    ///
    /// A `Running` execution is only reported as a candidate here; whether it
    /// is really orphaned depends on its lease, which the store checks.
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ExecutionStatus::Pending | ExecutionStatus::Running => true,
            ExecutionStatus::Failed => self.next_retry_at.is_some_and(|at| at <= now),
            ExecutionStatus::Sleeping => self.sleep_until.is_some_and(|at| at <= now),
            ExecutionStatus::Completed => false,
        }
    }

    /// Number of attempts consumed so far.
    pub fn attempts_used(&self) -> u32 {
        self.max_attempts.saturating_sub(self.remaining_attempts)
    }
}
