//! Time-bounded exclusivity grants.
//!
//! At most one live lease exists per `resource_id`. Only the holder may renew
//! or release it; once expired, any worker may take it over.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a lease protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseKind {
    Workflow,
    Step,
    CronJob,
}

impl LeaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseKind::Workflow => "workflow",
            LeaseKind::Step => "step",
            LeaseKind::CronJob => "cron_job",
        }
    }
}

impl fmt::Display for LeaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow" => Ok(LeaseKind::Workflow),
            "step" => Ok(LeaseKind::Step),
            "cron_job" => Ok(LeaseKind::CronJob),
            other => Err(format!("invalid lease kind: '{other}'")),
        }
    }
}

/// A lease row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    /// Primary key: the execution ID for workflows, `cron:<job id>` for crons.
    pub resource_id: String,
    pub kind: LeaseKind,
    pub namespace: String,
    pub worker_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

impl Lease {
    /// Expired leases may be taken over by any worker.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether `worker_id` holds this lease and it is still live at `now`.
    pub fn is_held_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.worker_id == worker_id && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_is_inclusive_of_expires_at() {
        let now = Utc::now();
        let lease = Lease {
            resource_id: "r1".to_string(),
            kind: LeaseKind::Workflow,
            namespace: "default".to_string(),
            worker_id: "w1".to_string(),
            acquired_at: now,
            expires_at: now + Duration::seconds(30),
            heartbeat_at: now,
        };
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + Duration::seconds(30)));
        assert!(lease.is_held_by("w1", now));
        assert!(!lease.is_held_by("w2", now));
    }

    #[test]
    fn lease_kind_uses_snake_case_names() {
        assert_eq!(LeaseKind::CronJob.as_str(), "cron_job");
        assert_eq!("cron_job".parse::<LeaseKind>().unwrap(), LeaseKind::CronJob);
    }
}
