use thiserror::Error;

/// Errors from `Store` operations.
///
/// `AlreadyLeased` and `NotAvailable` are contention outcomes: another worker
/// won the race or the execution is no longer eligible. Callers treat them as
/// "skip and try next poll", never as failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("resource '{resource_id}' is leased by '{holder}'")]
    AlreadyLeased { resource_id: String, holder: String },

    #[error("resource '{resource_id}' is not available for leasing")]
    NotAvailable { resource_id: String },
}

impl StoreError {
    /// True for the expected race outcomes of lease acquisition.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyLeased { .. } | StoreError::NotAvailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");

        let err = StoreError::AlreadyLeased {
            resource_id: "abc".to_string(),
            holder: "worker-1".to_string(),
        };
        assert_eq!(err.to_string(), "resource 'abc' is leased by 'worker-1'");
    }

    #[test]
    fn test_contention_classification() {
        assert!(StoreError::NotAvailable { resource_id: "x".into() }.is_contention());
        assert!(
            StoreError::AlreadyLeased {
                resource_id: "x".into(),
                holder: "w".into()
            }
            .is_contention()
        );
        assert!(!StoreError::Connection.is_contention());
        assert!(!StoreError::NotFound.is_contention());
    }
}
