//! Store trait definition.
//!
//! Defines the persistence port the orchestrator depends on. The
//! infrastructure layer (stepflow-infra) implements it with SQLite.
//!
//! Every method is atomic on its own. The two load-bearing ones are
//! [`Store::acquire_workflow_lease`], which must re-check eligibility, check
//! the existing lease, write the lease and flip the execution to `running` as
//! one unit, and [`Store::get_pending_workflows`], which defines what "eligible"
//! means for polling.
//!
//! The methods return boxed futures so the store can be shared as
//! `Arc<dyn Store>` between the engine, every worker loop and every
//! execution context.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use stepflow_types::cron::CronJob;
use stepflow_types::error::StoreError;
use stepflow_types::execution::{ExecutionStatus, WorkflowExecution};
use stepflow_types::lease::{Lease, LeaseKind};
use stepflow_types::step::WorkflowStep;
use uuid::Uuid;

/// Future returned by every [`Store`] method.
pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

/// Persistence port for executions, steps, leases and cron jobs.
///
/// Transient failures (connectivity, lock contention) are surfaced as
/// `StoreError::Connection` / `StoreError::Query` without interpretation;
/// callers never assume partial success.
pub trait Store: Send + Sync {
    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Persist a new execution row.
    fn create_workflow<'a>(&'a self, execution: &'a WorkflowExecution) -> StoreFuture<'a, ()>;

    /// Get an execution by ID within a namespace.
    fn get_workflow<'a>(
        &'a self,
        namespace: &'a str,
        id: Uuid,
    ) -> StoreFuture<'a, Option<WorkflowExecution>>;

    /// List executions, newest first, optionally filtered by status.
    fn list_workflows<'a>(
        &'a self,
        namespace: &'a str,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> StoreFuture<'a, Vec<WorkflowExecution>>;

    /// Executions eligible for (re-)acquisition, oldest `created_at` first.
    ///
    /// Eligible means `pending`; `failed` with `next_retry_at <= now`;
    /// `sleeping` with `sleep_until <= now`; or `running` with no unexpired
    /// lease (orphaned by a vanished worker). When `workflow_names` is
    /// non-empty only those workflows are returned.
    fn get_pending_workflows<'a>(
        &'a self,
        namespace: &'a str,
        limit: u32,
        workflow_names: &'a [String],
    ) -> StoreFuture<'a, Vec<WorkflowExecution>>;

    /// Atomically lease an execution and transition it to `running`.
    ///
    /// Fails with `StoreError::NotAvailable` when the execution is not
    /// eligible, and with `StoreError::AlreadyLeased` when another worker
    /// holds an unexpired lease on it. Returns the execution as it stands
    /// after the transition.
    fn acquire_workflow_lease<'a>(
        &'a self,
        execution_id: Uuid,
        namespace: &'a str,
        worker_id: &'a str,
        lease_duration: Duration,
    ) -> StoreFuture<'a, WorkflowExecution>;

    /// Mark an execution `completed`. Only the lease holder may do this.
    fn complete_workflow<'a>(
        &'a self,
        namespace: &'a str,
        id: Uuid,
        worker_id: &'a str,
        output: Option<&'a [u8]>,
    ) -> StoreFuture<'a, ()>;

    /// Mark an execution `failed`, consuming one attempt.
    ///
    /// `next_retry_at = None` makes the failure final. Only the lease holder
    /// may do this.
    fn fail_workflow<'a>(
        &'a self,
        namespace: &'a str,
        id: Uuid,
        worker_id: &'a str,
        error_message: &'a str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> StoreFuture<'a, ()>;

    /// Mark an execution `sleeping` until `sleep_until`. Does not consume an
    /// attempt. Only the lease holder may do this.
    fn sleep_workflow<'a>(
        &'a self,
        namespace: &'a str,
        id: Uuid,
        worker_id: &'a str,
        sleep_until: DateTime<Utc>,
    ) -> StoreFuture<'a, ()>;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Look up a step by its composite identity.
    fn get_step<'a>(
        &'a self,
        namespace: &'a str,
        execution_id: Uuid,
        step_name: &'a str,
    ) -> StoreFuture<'a, Option<WorkflowStep>>;

    /// All steps of an execution in order.
    fn list_steps<'a>(
        &'a self,
        namespace: &'a str,
        execution_id: Uuid,
    ) -> StoreFuture<'a, Vec<WorkflowStep>>;

    /// Insert a new step record. `StoreError::Conflict` if the name exists.
    fn create_step<'a>(&'a self, step: &'a WorkflowStep) -> StoreFuture<'a, ()>;

    /// Reset a non-completed step to `running`, clearing its previous error
    /// and completion time and consuming one step attempt.
    fn restart_step<'a>(&'a self, namespace: &'a str, step_id: Uuid) -> StoreFuture<'a, ()>;

    /// Checkpoint a step as `completed` with its marshalled output.
    ///
    /// Never overwrites an already completed step; that case is reported as
    /// `StoreError::Conflict`.
    fn complete_step<'a>(
        &'a self,
        namespace: &'a str,
        step_id: Uuid,
        output: &'a [u8],
    ) -> StoreFuture<'a, ()>;

    /// Mark a step `failed` with an error message.
    fn fail_step<'a>(
        &'a self,
        namespace: &'a str,
        step_id: Uuid,
        error_message: &'a str,
    ) -> StoreFuture<'a, ()>;

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    /// Acquire (or take over an expired) lease on an arbitrary resource.
    ///
    /// Re-acquiring a lease the caller already holds refreshes it.
    fn acquire_lease<'a>(
        &'a self,
        resource_id: &'a str,
        kind: LeaseKind,
        namespace: &'a str,
        worker_id: &'a str,
        lease_duration: Duration,
    ) -> StoreFuture<'a, Lease>;

    /// Extend a lease held by `worker_id`. Returns `false` when the lease is
    /// gone or owned by someone else.
    fn renew_lease<'a>(
        &'a self,
        resource_id: &'a str,
        namespace: &'a str,
        worker_id: &'a str,
        lease_duration: Duration,
    ) -> StoreFuture<'a, bool>;

    /// Delete a lease held by `worker_id`. Returns `false` if it was not held.
    fn release_lease<'a>(
        &'a self,
        resource_id: &'a str,
        namespace: &'a str,
        worker_id: &'a str,
    ) -> StoreFuture<'a, bool>;

    fn get_lease<'a>(&'a self, resource_id: &'a str) -> StoreFuture<'a, Option<Lease>>;

    /// Delete every expired lease in the namespace. Returns the number removed.
    fn cleanup_expired_leases<'a>(&'a self, namespace: &'a str) -> StoreFuture<'a, u64>;

    // -----------------------------------------------------------------------
    // Cron jobs
    // -----------------------------------------------------------------------

    /// Insert or update a cron job by `(namespace, name)`.
    ///
    /// An existing row keeps its ID, `created_at` and `last_run_at`. Returns
    /// the stored row.
    fn upsert_cron_job<'a>(&'a self, job: &'a CronJob) -> StoreFuture<'a, CronJob>;

    fn get_cron_job<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<CronJob>>;

    fn list_cron_jobs<'a>(&'a self, namespace: &'a str) -> StoreFuture<'a, Vec<CronJob>>;

    /// Enabled jobs whose `next_run_at <= now`, earliest first.
    ///
    /// When `names` is non-empty only those jobs are returned, so rows left
    /// behind by crons no process handles any more cannot fill the batch.
    fn get_due_cron_jobs<'a>(
        &'a self,
        namespace: &'a str,
        now: DateTime<Utc>,
        limit: u32,
        names: &'a [String],
    ) -> StoreFuture<'a, Vec<CronJob>>;

    /// Record a dispatch and advance the schedule.
    fn record_cron_run<'a>(
        &'a self,
        namespace: &'a str,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()>;
}
