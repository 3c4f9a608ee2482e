//! Errors returned by workflow code.

use chrono::{DateTime, Utc};
use stepflow_types::error::StoreError;

use crate::marshal::MarshalError;

/// Sentinel carried out of a workflow when it has to wait.
///
/// Returned by [`super::sleep`] while the wake time is in the future. The
/// worker recognises it and parks the execution in `sleeping` instead of
/// recording a failure, so it must be propagated unchanged with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("workflow suspended until {until}")]
pub struct WorkflowSuspended {
    pub until: DateTime<Utc>,
}

/// Outcome of a workflow attempt that did not produce an output.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A step body returned an error. Consumes one workflow attempt.
    #[error("step '{name}' failed: {source:#}")]
    Step {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Suspended(#[from] WorkflowSuspended),

    #[error("marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The worker withdrew this attempt (shutdown or lost lease).
    #[error("workflow attempt cancelled")]
    Cancelled,

    /// Any other error raised directly by workflow code.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Wake time if this is a suspension rather than a failure.
    pub fn suspended_until(&self) -> Option<DateTime<Utc>> {
        match self {
            WorkflowError::Suspended(s) => Some(s.until),
            _ => None,
        }
    }

    pub fn is_suspension(&self) -> bool {
        self.suspended_until().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspension_is_distinguishable_from_failure() {
        let until = Utc::now();
        let err: WorkflowError = WorkflowSuspended { until }.into();
        assert!(err.is_suspension());
        assert_eq!(err.suspended_until(), Some(until));

        let err: WorkflowError = anyhow::anyhow!("boom").into();
        assert!(!err.is_suspension());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn step_error_names_the_step() {
        let err = WorkflowError::Step {
            name: "charge-card".to_string(),
            source: anyhow::anyhow!("card declined"),
        };
        assert_eq!(err.to_string(), "step 'charge-card' failed: card declined");
    }
}
