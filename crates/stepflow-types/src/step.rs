//! Checkpointed step records.
//!
//! A `WorkflowStep` is identified by `(namespace, execution_id, step_name)`.
//! Once completed, its `output_data` is the authoritative result for every
//! replay of that step name within the execution.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a single step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(format!("invalid step status: '{other}'")),
        }
    }
}

/// One named step of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// UUIDv7 row ID.
    pub id: Uuid,
    pub namespace: String,
    pub execution_id: Uuid,
    /// Caller-chosen stable name; the step's identity within the execution.
    pub step_name: String,
    /// Order index assigned when the record was first created.
    pub step_order: i64,
    pub status: StepStatus,
    /// Marshalled result; immutable once `status == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub max_attempts: u32,
    pub remaining_attempts: u32,
}

impl WorkflowStep {
    /// A fresh `Running` step record starting now.
    pub fn start(
        namespace: &str,
        execution_id: Uuid,
        step_name: &str,
        step_order: i64,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            namespace: namespace.to_string(),
            execution_id,
            step_name: step_name.to_string(),
            step_order,
            status: StepStatus::Running,
            output_data: None,
            error_message: None,
            started_at: Some(crate::clock::now()),
            completed_at: None,
            max_attempts,
            remaining_attempts: max_attempts.saturating_sub(1),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}
