//! Worker: polls the store and runs executions.
//!
//! A worker runs four background loops until shut down:
//!
//! - **poll** -- lease eligible executions up to the concurrency limit and
//!   run each one as its own task
//! - **heartbeat** -- renew the leases of running executions; an execution
//!   whose lease cannot be renewed is cancelled
//! - **cleanup** -- delete expired leases in the namespace
//! - **cron** -- dispatch due cron jobs this process has handlers for
//!
//! Any number of workers (in any number of processes) may share a store and
//! namespace. Leases guarantee that one execution is run by at most one of
//! them at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use stepflow_types::clock;
use stepflow_types::config::WorkerConfig;
use stepflow_types::cron::CronJob;
use stepflow_types::execution::WorkflowExecution;
use stepflow_types::lease::LeaseKind;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::cron::CronSchedule;
use crate::engine::{CronInvocation, CronTarget, Engine};
use crate::workflow::context::WorkflowContext;
use crate::workflow::error::WorkflowError;
use crate::workflow::registry::{DuplicateWorkflow, Workflow, WorkflowRegistry};
use crate::workflow::retry::RetryHandler;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("invalid worker configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    DuplicateWorkflow(#[from] DuplicateWorkflow),

    #[error("worker has already been started")]
    AlreadyStarted,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    engine: Engine,
    config: WorkerConfig,
    worker_id: String,
    registry: WorkflowRegistry,
    /// Running executions and the token that withdraws each of them.
    active: DashMap<Uuid, CancellationToken>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    started: AtomicBool,
}

/// How an attempt ended, before it is persisted.
enum AttemptOutcome {
    Finished(Result<Vec<u8>, WorkflowError>),
    TimedOut(Duration),
    Withdrawn,
}

impl Worker {
    /// Create a worker bound to `engine`'s store and namespace.
    ///
    /// `config.namespace` must match the engine's namespace.
    pub fn new(engine: &Engine, config: WorkerConfig) -> Result<Self, WorkerError> {
        config.validate().map_err(WorkerError::InvalidConfig)?;
        if config.namespace != engine.namespace() {
            return Err(WorkerError::InvalidConfig(format!(
                "worker namespace '{}' does not match engine namespace '{}'",
                config.namespace,
                engine.namespace()
            )));
        }
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", Uuid::now_v7()));

        Ok(Self {
            inner: Arc::new(WorkerInner {
                engine: engine.clone(),
                config,
                worker_id,
                registry: WorkflowRegistry::new(),
                active: DashMap::new(),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                started: AtomicBool::new(false),
            }),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Make `workflow` runnable by this worker. May be called after `start`.
    pub fn register_workflow<W: Workflow>(&self, workflow: W) -> Result<(), WorkerError> {
        let name = workflow.name().to_string();
        self.inner.registry.register(workflow)?;
        tracing::debug!(worker_id = %self.inner.worker_id, workflow = %name, "workflow registered");
        Ok(())
    }

    /// Spawn the background loops. Must be called inside a Tokio runtime.
    pub fn start(&self) -> Result<(), WorkerError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }

        tracing::info!(
            worker_id = %self.inner.worker_id,
            namespace = %self.inner.engine.namespace(),
            concurrency = self.inner.config.concurrency,
            workflows = ?self.inner.registry.names(),
            "worker starting"
        );

        self.inner.tasks.spawn(Arc::clone(&self.inner).poll_loop());
        self.inner.tasks.spawn(Arc::clone(&self.inner).heartbeat_loop());
        self.inner.tasks.spawn(Arc::clone(&self.inner).cleanup_loop());
        self.inner.tasks.spawn(Arc::clone(&self.inner).cron_loop());
        Ok(())
    }

    /// Stop polling, withdraw running executions and wait for every task to
    /// finish. Withdrawn executions release their leases without consuming
    /// an attempt and are picked up again by any live worker.
    ///
    /// Wrap in `tokio::time::timeout` to bound the wait.
    pub async fn shutdown(&self) {
        tracing::info!(
            worker_id = %self.inner.worker_id,
            active = self.inner.active.len(),
            "worker shutting down"
        );
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!(worker_id = %self.inner.worker_id, "worker stopped");
    }

    /// Number of executions currently running in this worker.
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl WorkerInner {
    fn namespace(&self) -> &str {
        self.engine.namespace()
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.poll_once().await,
            }
        }
        tracing::debug!(worker_id = %self.worker_id, "poll loop stopped");
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.heartbeat_once().await,
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval().saturating_mul(2));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.cleanup_once().await,
            }
        }
    }

    async fn cron_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.cron_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.cron_once().await,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Poll
    // -----------------------------------------------------------------------

    async fn poll_once(self: &Arc<Self>) {
        let capacity = self.config.concurrency.saturating_sub(self.active.len());
        if capacity == 0 {
            return;
        }
        let names = self.registry.names();
        if names.is_empty() {
            return;
        }

        let store = self.engine.store();
        let limit = u32::try_from(capacity).unwrap_or(u32::MAX);
        let candidates = match store
            .get_pending_workflows(self.namespace(), limit, &names)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(worker_id = %self.worker_id, error = %e, "failed to poll for workflows");
                return;
            }
        };

        for candidate in candidates {
            if self.shutdown.is_cancelled() || self.active.len() >= self.config.concurrency {
                break;
            }
            if self.active.contains_key(&candidate.id) {
                continue;
            }
            match store
                .acquire_workflow_lease(
                    candidate.id,
                    self.namespace(),
                    &self.worker_id,
                    self.config.lease_duration(),
                )
                .await
            {
                Ok(execution) => self.spawn_execution(execution),
                Err(e) if e.is_contention() => {
                    tracing::trace!(execution_id = %candidate.id, reason = %e, "execution not acquired");
                }
                Err(e) => {
                    tracing::warn!(execution_id = %candidate.id, error = %e, "failed to acquire execution lease");
                }
            }
        }
    }

    fn spawn_execution(self: &Arc<Self>, execution: WorkflowExecution) {
        let id = execution.id;
        let token = self.shutdown.child_token();
        self.active.insert(id, token.clone());

        let span = tracing::info_span!(
            "execution",
            execution_id = %id,
            workflow = %execution.workflow_name,
            worker_id = %self.worker_id,
        );
        let inner = Arc::clone(self);
        self.tasks.spawn(
            async move {
                inner.run_execution(execution, token).await;
                inner.release(&id.to_string()).await;
                inner.active.remove(&id);
            }
            .instrument(span),
        );
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn run_execution(&self, execution: WorkflowExecution, token: CancellationToken) {
        let store = self.engine.store();

        let Some(handler) = self.registry.get(&execution.workflow_name) else {
            let message = format!(
                "no workflow registered under name '{}'",
                execution.workflow_name
            );
            tracing::warn!(error = %message, "failing execution");
            if let Err(e) = store
                .fail_workflow(self.namespace(), execution.id, &self.worker_id, &message, None)
                .await
            {
                tracing::warn!(error = %e, "failed to record missing handler");
            }
            return;
        };

        tracing::info!(
            attempt = execution.attempts_used() + 1,
            max_attempts = execution.max_attempts,
            "running workflow"
        );

        let ctx = WorkflowContext::new(
            &execution,
            self.worker_id.clone(),
            Arc::clone(store),
            Arc::clone(self.engine.marshaller()),
            token.clone(),
        );
        let timeout = Duration::from_millis(execution.timeout_ms);

        let outcome = tokio::select! {
            _ = token.cancelled() => AttemptOutcome::Withdrawn,
            result = tokio::time::timeout(timeout, handler.run_raw(&ctx, &execution.input_data)) => {
                match result {
                    Ok(result) => AttemptOutcome::Finished(result),
                    Err(_) => AttemptOutcome::TimedOut(timeout),
                }
            }
        };

        self.record_outcome(&execution, outcome).await;
    }

    async fn record_outcome(&self, execution: &WorkflowExecution, outcome: AttemptOutcome) {
        let store = self.engine.store();
        let namespace = self.namespace();
        let id = execution.id;

        let result = match outcome {
            AttemptOutcome::Finished(Ok(output)) => {
                tracing::info!("workflow completed");
                store
                    .complete_workflow(namespace, id, &self.worker_id, Some(&output))
                    .await
            }
            AttemptOutcome::Finished(Err(WorkflowError::Suspended(suspended))) => {
                tracing::info!(until = %suspended.until, "workflow sleeping");
                store
                    .sleep_workflow(namespace, id, &self.worker_id, suspended.until)
                    .await
            }
            AttemptOutcome::Finished(Err(WorkflowError::Cancelled)) | AttemptOutcome::Withdrawn => {
                tracing::info!("workflow attempt withdrawn, releasing lease");
                Ok(())
            }
            AttemptOutcome::Finished(Err(e)) => {
                self.record_failure(execution, &e.to_string()).await
            }
            AttemptOutcome::TimedOut(timeout) => {
                let message = format!("attempt timed out after {}ms", timeout.as_millis());
                self.record_failure(execution, &message).await
            }
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to record workflow outcome");
        }
    }

    async fn record_failure(
        &self,
        execution: &WorkflowExecution,
        message: &str,
    ) -> Result<(), stepflow_types::error::StoreError> {
        let decision = RetryHandler::decide(execution, clock::now());
        match decision.next_retry_at() {
            Some(at) => tracing::warn!(error = message, retry_at = %at, "workflow attempt failed, retry scheduled"),
            None => tracing::warn!(error = message, "workflow failed permanently"),
        }
        self.engine
            .store()
            .fail_workflow(
                self.namespace(),
                execution.id,
                &self.worker_id,
                message,
                decision.next_retry_at(),
            )
            .await
    }

    async fn release(&self, resource_id: &str) {
        if let Err(e) = self
            .engine
            .store()
            .release_lease(resource_id, self.namespace(), &self.worker_id)
            .await
        {
            tracing::warn!(resource_id, error = %e, "failed to release lease");
        }
    }

    // -----------------------------------------------------------------------
    // Heartbeat / cleanup
    // -----------------------------------------------------------------------

    async fn heartbeat_once(&self) {
        let ids: Vec<Uuid> = self.active.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            match self
                .engine
                .store()
                .renew_lease(
                    &id.to_string(),
                    self.namespace(),
                    &self.worker_id,
                    self.config.lease_duration(),
                )
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(execution_id = %id, worker_id = %self.worker_id, "lease lost, cancelling execution");
                    if let Some(token) = self.active.get(&id) {
                        token.cancel();
                    }
                }
                Err(e) => {
                    tracing::warn!(execution_id = %id, error = %e, "failed to renew lease");
                }
            }
        }
    }

    async fn cleanup_once(&self) {
        match self.engine.store().cleanup_expired_leases(self.namespace()).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "expired leases cleaned up"),
            Err(e) => tracing::warn!(error = %e, "failed to clean up expired leases"),
        }
    }

    // -----------------------------------------------------------------------
    // Cron
    // -----------------------------------------------------------------------

    async fn cron_once(&self) {
        let names = self.engine.cron_names();
        if names.is_empty() {
            return;
        }
        let now = clock::now();
        let jobs = match self
            .engine
            .store()
            .get_due_cron_jobs(self.namespace(), now, self.config.cron_batch_size, &names)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load due cron jobs");
                return;
            }
        };

        for job in jobs {
            if self.shutdown.is_cancelled() {
                break;
            }
            let Some(target) = self.engine.cron_target(&job.name) else {
                tracing::trace!(cron = %job.name, "no local handler for cron job");
                continue;
            };

            let resource_id = job.lease_resource_id();
            match self
                .engine
                .store()
                .acquire_lease(
                    &resource_id,
                    LeaseKind::CronJob,
                    self.namespace(),
                    &self.worker_id,
                    self.config.lease_duration(),
                )
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_contention() => continue,
                Err(e) => {
                    tracing::warn!(cron = %job.name, error = %e, "failed to acquire cron lease");
                    continue;
                }
            }

            self.dispatch_cron(&job.name, target, now).await;
            self.release(&resource_id).await;
        }
    }

    /// Advance the job's schedule and run its target. The schedule is
    /// advanced before the target runs, so a dispatch is never repeated even
    /// if the target outlives the cron lease.
    async fn dispatch_cron(&self, name: &str, target: CronTarget, now: DateTime<Utc>) {
        let store = self.engine.store();

        // Another worker may have dispatched this run between our read and our lease.
        let job: CronJob = match store.get_cron_job(self.namespace(), name).await {
            Ok(Some(job)) if job.is_due(now) => job,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(cron = name, error = %e, "failed to reload cron job");
                return;
            }
        };

        let schedule = match CronSchedule::parse(&job.cron_spec) {
            Ok(schedule) => schedule,
            Err(e) => {
                tracing::warn!(cron = name, spec = %job.cron_spec, error = %e, "stored cron spec is invalid");
                return;
            }
        };
        let next_run_at = schedule.next(now);
        if let Err(e) = store
            .record_cron_run(self.namespace(), job.id, now, next_run_at)
            .await
        {
            tracing::warn!(cron = name, error = %e, "failed to advance cron job");
            return;
        }

        tracing::info!(cron = name, scheduled_at = %job.next_run_at, %next_run_at, "dispatching cron job");

        match target {
            CronTarget::Handler(handler) => {
                let invocation = CronInvocation {
                    namespace: self.namespace().to_string(),
                    job_name: name.to_string(),
                    scheduled_at: job.next_run_at,
                    dispatched_at: now,
                    cancellation: self.shutdown.child_token(),
                };
                let job_name = name.to_string();
                self.tasks.spawn(async move {
                    if let Err(e) = handler(invocation).await {
                        tracing::warn!(cron = %job_name, error = %format!("{e:#}"), "cron handler failed");
                    }
                });
            }
            CronTarget::Workflow {
                workflow_name,
                input,
                options,
            } => match self
                .engine
                .start_workflow_raw(&workflow_name, input, options)
                .await
            {
                Ok(execution_id) => {
                    tracing::debug!(cron = name, %execution_id, "cron started workflow");
                }
                Err(e) => {
                    tracing::warn!(cron = name, workflow = %workflow_name, error = %e, "cron failed to start workflow");
                }
            },
        }
    }
}
