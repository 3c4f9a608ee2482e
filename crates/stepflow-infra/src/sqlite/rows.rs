//! Row types and column conversions shared by the SQLite store.
//!
//! Timestamps are stored as epoch milliseconds, IDs as hyphenated UUID text,
//! status enums as their lowercase names and payloads as BLOBs.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use stepflow_types::cron::CronJob;
use stepflow_types::error::StoreError;
use stepflow_types::execution::{ExecutionStatus, WorkflowExecution};
use stepflow_types::lease::{Lease, LeaseKind};
use stepflow_types::step::{StepStatus, WorkflowStep};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

pub(crate) fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn opt_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(millis)
}

pub(crate) fn parse_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Query(format!("timestamp out of range: {ms}")))
}

fn parse_opt_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(parse_millis).transpose()
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    s.parse::<Uuid>()
        .map_err(|e| StoreError::Query(format!("invalid UUID: {e}")))
}

fn parse_count(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Query(format!("invalid {column}: {value}")))
}

/// Saturating u64 -> INTEGER.
pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn map_sqlx(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection
        }
        other => StoreError::Query(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

pub(crate) struct ExecutionRow {
    id: String,
    namespace: String,
    workflow_name: String,
    status: String,
    input_data: Vec<u8>,
    output_data: Option<Vec<u8>>,
    max_attempts: i64,
    remaining_attempts: i64,
    next_retry_at: Option<i64>,
    sleep_until: Option<i64>,
    timeout_ms: i64,
    retry_backoff_ms: i64,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    error_message: Option<String>,
}

impl ExecutionRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            namespace: row.try_get("namespace")?,
            workflow_name: row.try_get("workflow_name")?,
            status: row.try_get("status")?,
            input_data: row.try_get("input_data")?,
            output_data: row.try_get("output_data")?,
            max_attempts: row.try_get("max_attempts")?,
            remaining_attempts: row.try_get("remaining_attempts")?,
            next_retry_at: row.try_get("next_retry_at")?,
            sleep_until: row.try_get("sleep_until")?,
            timeout_ms: row.try_get("timeout_ms")?,
            retry_backoff_ms: row.try_get("retry_backoff_ms")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error_message: row.try_get("error_message")?,
        })
    }

    pub(crate) fn into_execution(self) -> Result<WorkflowExecution, StoreError> {
        let status: ExecutionStatus = self.status.parse().map_err(StoreError::Query)?;
        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            workflow_name: self.workflow_name,
            namespace: self.namespace,
            status,
            input_data: self.input_data,
            output_data: self.output_data,
            max_attempts: parse_count(self.max_attempts, "max_attempts")?,
            remaining_attempts: parse_count(self.remaining_attempts, "remaining_attempts")?,
            next_retry_at: parse_opt_millis(self.next_retry_at)?,
            sleep_until: parse_opt_millis(self.sleep_until)?,
            timeout_ms: to_u64(self.timeout_ms),
            retry_backoff_ms: to_u64(self.retry_backoff_ms),
            created_at: parse_millis(self.created_at)?,
            started_at: parse_opt_millis(self.started_at)?,
            completed_at: parse_opt_millis(self.completed_at)?,
            error_message: self.error_message,
        })
    }
}

pub(crate) fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution, StoreError> {
    ExecutionRow::from_row(row).map_err(map_sqlx)?.into_execution()
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

pub(crate) struct StepRow {
    id: String,
    namespace: String,
    execution_id: String,
    step_name: String,
    step_order: i64,
    status: String,
    output_data: Option<Vec<u8>>,
    error_message: Option<String>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    max_attempts: i64,
    remaining_attempts: i64,
}

impl StepRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            namespace: row.try_get("namespace")?,
            execution_id: row.try_get("execution_id")?,
            step_name: row.try_get("step_name")?,
            step_order: row.try_get("step_order")?,
            status: row.try_get("status")?,
            output_data: row.try_get("output_data")?,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            max_attempts: row.try_get("max_attempts")?,
            remaining_attempts: row.try_get("remaining_attempts")?,
        })
    }

    pub(crate) fn into_step(self) -> Result<WorkflowStep, StoreError> {
        let status: StepStatus = self.status.parse().map_err(StoreError::Query)?;
        Ok(WorkflowStep {
            id: parse_uuid(&self.id)?,
            namespace: self.namespace,
            execution_id: parse_uuid(&self.execution_id)?,
            step_name: self.step_name,
            step_order: self.step_order,
            status,
            output_data: self.output_data,
            error_message: self.error_message,
            started_at: parse_opt_millis(self.started_at)?,
            completed_at: parse_opt_millis(self.completed_at)?,
            max_attempts: parse_count(self.max_attempts, "max_attempts")?,
            remaining_attempts: parse_count(self.remaining_attempts, "remaining_attempts")?,
        })
    }
}

pub(crate) fn step_from_row(row: &SqliteRow) -> Result<WorkflowStep, StoreError> {
    StepRow::from_row(row).map_err(map_sqlx)?.into_step()
}

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

pub(crate) fn lease_from_row(row: &SqliteRow) -> Result<Lease, StoreError> {
    let kind: String = row.try_get("kind").map_err(map_sqlx)?;
    let kind: LeaseKind = kind.parse().map_err(StoreError::Query)?;
    Ok(Lease {
        resource_id: row.try_get("resource_id").map_err(map_sqlx)?,
        kind,
        namespace: row.try_get("namespace").map_err(map_sqlx)?,
        worker_id: row.try_get("worker_id").map_err(map_sqlx)?,
        acquired_at: parse_millis(row.try_get("acquired_at").map_err(map_sqlx)?)?,
        expires_at: parse_millis(row.try_get("expires_at").map_err(map_sqlx)?)?,
        heartbeat_at: parse_millis(row.try_get("heartbeat_at").map_err(map_sqlx)?)?,
    })
}

// ---------------------------------------------------------------------------
// Cron jobs
// ---------------------------------------------------------------------------

pub(crate) struct CronJobRow {
    id: String,
    namespace: String,
    name: String,
    cron_spec: String,
    workflow_name: Option<String>,
    enabled: bool,
    last_run_at: Option<i64>,
    next_run_at: i64,
    created_at: i64,
    updated_at: i64,
}

impl CronJobRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            namespace: row.try_get("namespace")?,
            name: row.try_get("name")?,
            cron_spec: row.try_get("cron_spec")?,
            workflow_name: row.try_get("workflow_name")?,
            enabled: row.try_get("enabled")?,
            last_run_at: row.try_get("last_run_at")?,
            next_run_at: row.try_get("next_run_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub(crate) fn into_job(self) -> Result<CronJob, StoreError> {
        Ok(CronJob {
            id: parse_uuid(&self.id)?,
            namespace: self.namespace,
            name: self.name,
            cron_spec: self.cron_spec,
            workflow_name: self.workflow_name,
            enabled: self.enabled,
            last_run_at: parse_opt_millis(self.last_run_at)?,
            next_run_at: parse_millis(self.next_run_at)?,
            created_at: parse_millis(self.created_at)?,
            updated_at: parse_millis(self.updated_at)?,
        })
    }
}

pub(crate) fn cron_job_from_row(row: &SqliteRow) -> Result<CronJob, StoreError> {
    CronJobRow::from_row(row).map_err(map_sqlx)?.into_job()
}
