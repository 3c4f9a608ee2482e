//! Per-attempt execution context.
//!
//! A `WorkflowContext` is built by the worker for every attempt of an
//! execution and handed to the workflow's `run`. It carries the identity of
//! the execution, the store and marshaller the step primitives use, and the
//! cancellation signal raised on shutdown or lease loss.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use stepflow_types::execution::WorkflowExecution;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::marshal::Marshaller;
use crate::store::Store;

/// Handle to the running attempt of a workflow execution.
///
/// Cheap to clone; clones share the step-order counter and the
/// cancellation token.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    execution_id: Uuid,
    workflow_name: String,
    namespace: String,
    worker_id: String,
    attempt: u32,
    max_attempts: u32,
    store: Arc<dyn Store>,
    marshaller: Arc<dyn Marshaller>,
    step_counter: AtomicI64,
    cancellation: CancellationToken,
}

impl WorkflowContext {
    /// Build the context for the attempt that is about to run `execution`.
    ///
    /// `execution` must be the leased row, so that `remaining_attempts`
    /// reflects the attempts consumed before this one.
    pub fn new(
        execution: &WorkflowExecution,
        worker_id: impl Into<String>,
        store: Arc<dyn Store>,
        marshaller: Arc<dyn Marshaller>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                execution_id: execution.id,
                workflow_name: execution.workflow_name.clone(),
                namespace: execution.namespace.clone(),
                worker_id: worker_id.into(),
                attempt: execution.attempts_used() + 1,
                max_attempts: execution.max_attempts,
                store,
                marshaller,
                step_counter: AtomicI64::new(0),
                cancellation,
            }),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.inner.execution_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.inner.workflow_name
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// 1-based number of the current attempt.
    pub fn attempt(&self) -> u32 {
        self.inner.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.inner.max_attempts
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn marshaller(&self) -> &dyn Marshaller {
        self.inner.marshaller.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Resolves once the worker withdraws this attempt.
    pub async fn cancelled(&self) {
        self.inner.cancellation.cancelled().await
    }

    /// Claim the next position in this attempt's step sequence.
    ///
    /// The counter advances on every step call, replayed or not, so a
    /// deterministic workflow assigns the same order to the same step on
    /// every attempt.
    pub(crate) fn next_step_order(&self) -> i64 {
        self.inner.step_counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("execution_id", &self.inner.execution_id)
            .field("workflow_name", &self.inner.workflow_name)
            .field("namespace", &self.inner.namespace)
            .field("worker_id", &self.inner.worker_id)
            .field("attempt", &self.inner.attempt)
            .finish_non_exhaustive()
    }
}
