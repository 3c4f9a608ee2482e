//! Recurring schedule records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One named recurring schedule. Names are unique per namespace.
///
/// Only the schedule metadata is persisted; the handler that runs on each
/// dispatch lives in the registering process and must be re-registered on
/// every start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub id: Uuid,
    pub namespace: String,
    pub name: String,
    /// 5-field cron expression.
    pub cron_spec: String,
    /// Workflow started on each dispatch; `None` when a direct handler runs instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CronJob {
    /// Whether the job should be dispatched at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at <= now
    }

    /// Resource ID used for this job's dispatch lease.
    pub fn lease_resource_id(&self) -> String {
        format!("cron:{}", self.id)
    }
}
