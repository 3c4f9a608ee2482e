//! Engine: the client-side entry point.
//!
//! An [`Engine`] binds a store, a namespace and a marshaller. It starts
//! workflow executions, registers cron jobs and answers status queries.
//! Workers are built from an engine and share its store, marshaller and cron
//! registrations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::BoxFuture;
use serde::Serialize;
use stepflow_types::clock;
use stepflow_types::cron::CronJob;
use stepflow_types::error::StoreError;
use stepflow_types::execution::{ExecutionStatus, WorkflowExecution};
use stepflow_types::step::WorkflowStep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cron::{CronError, CronSchedule};
use crate::marshal::{self, JsonMarshaller, MarshalError, Marshaller};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid cron spec: {0}")]
    Cron(#[from] CronError),

    #[error("cron job '{0}' is already registered")]
    DuplicateCron(String),

    #[error("workflow execution {0} not found")]
    NotFound(Uuid),

    #[error("marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// StartOptions
// ---------------------------------------------------------------------------

/// Per-execution retry and timeout settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// Total number of attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Upper bound on a single attempt.
    pub timeout: Duration,
    /// Base delay of the exponential retry backoff.
    pub retry_backoff: Duration,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(60 * 60),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl StartOptions {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(EngineError::InvalidConfig("timeout must be positive".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cron targets
// ---------------------------------------------------------------------------

/// Details of one cron dispatch, passed to the handler.
#[derive(Debug, Clone)]
pub struct CronInvocation {
    pub namespace: String,
    pub job_name: String,
    /// The `next_run_at` the dispatch was due at.
    pub scheduled_at: DateTime<Utc>,
    pub dispatched_at: DateTime<Utc>,
    /// Cancelled when the dispatching worker shuts down.
    pub cancellation: CancellationToken,
}

/// Direct cron handler.
pub type CronHandler =
    Arc<dyn Fn(CronInvocation) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// What a cron dispatch does in this process.
#[derive(Clone)]
pub(crate) enum CronTarget {
    Handler(CronHandler),
    Workflow {
        workflow_name: String,
        input: Vec<u8>,
        options: StartOptions,
    },
}

// ---------------------------------------------------------------------------
// EngineBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Engine`]. A store is required; the namespace defaults to
/// `"default"` and the marshaller to JSON.
#[derive(Default)]
pub struct EngineBuilder {
    store: Option<Arc<dyn Store>>,
    namespace: Option<String>,
    marshaller: Option<Arc<dyn Marshaller>>,
}

impl EngineBuilder {
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshaller = Some(marshaller);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let store = self
            .store
            .ok_or_else(|| EngineError::InvalidConfig("a store is required".to_string()))?;
        let namespace = self.namespace.unwrap_or_else(|| "default".to_string());
        if namespace.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "namespace must not be empty".to_string(),
            ));
        }
        let marshaller = self.marshaller.unwrap_or_else(|| Arc::new(JsonMarshaller));

        tracing::debug!(%namespace, marshaller = marshaller.name(), "engine built");

        Ok(Engine {
            inner: Arc::new(EngineInner {
                store,
                namespace,
                marshaller,
                crons: DashMap::new(),
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Shared handle; clones refer to the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn Store>,
    namespace: String,
    marshaller: Arc<dyn Marshaller>,
    crons: DashMap<String, CronTarget>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn marshaller(&self) -> &Arc<dyn Marshaller> {
        &self.inner.marshaller
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Create a `pending` execution of `workflow_name` with `payload` as its
    /// input. The execution runs once a worker that registered the workflow
    /// picks it up.
    pub async fn start_workflow<P>(
        &self,
        workflow_name: &str,
        payload: &P,
        options: StartOptions,
    ) -> Result<Uuid, EngineError>
    where
        P: Serialize + ?Sized,
    {
        let input = marshal::encode(self.inner.marshaller.as_ref(), payload)?;
        self.start_workflow_raw(workflow_name, input, options).await
    }

    /// Like [`Engine::start_workflow`] with an already marshalled input.
    pub async fn start_workflow_raw(
        &self,
        workflow_name: &str,
        input: Vec<u8>,
        options: StartOptions,
    ) -> Result<Uuid, EngineError> {
        if workflow_name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "workflow name must not be empty".to_string(),
            ));
        }
        options.validate()?;

        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            workflow_name: workflow_name.to_string(),
            namespace: self.inner.namespace.clone(),
            status: ExecutionStatus::Pending,
            input_data: input,
            output_data: None,
            max_attempts: options.max_attempts,
            remaining_attempts: options.max_attempts,
            next_retry_at: None,
            sleep_until: None,
            timeout_ms: duration_ms(options.timeout),
            retry_backoff_ms: duration_ms(options.retry_backoff),
            created_at: clock::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        };
        self.inner.store.create_workflow(&execution).await?;

        tracing::info!(
            execution_id = %execution.id,
            workflow = workflow_name,
            namespace = %self.inner.namespace,
            "workflow started"
        );
        Ok(execution.id)
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<WorkflowExecution, EngineError> {
        self.inner
            .store
            .get_workflow(&self.inner.namespace, id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// Decode the output of a completed execution. `None` until completion.
    pub async fn workflow_output<T>(&self, id: Uuid) -> Result<Option<T>, EngineError>
    where
        T: serde::de::DeserializeOwned,
    {
        let execution = self.get_workflow(id).await?;
        match (execution.status, execution.output_data) {
            (ExecutionStatus::Completed, Some(bytes)) => {
                Ok(Some(marshal::decode(self.inner.marshaller.as_ref(), &bytes)?))
            }
            _ => Ok(None),
        }
    }

    pub async fn list_workflows(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        Ok(self
            .inner
            .store
            .list_workflows(&self.inner.namespace, status, limit)
            .await?)
    }

    pub async fn list_steps(&self, execution_id: Uuid) -> Result<Vec<WorkflowStep>, EngineError> {
        Ok(self
            .inner
            .store
            .list_steps(&self.inner.namespace, execution_id)
            .await?)
    }

    // -----------------------------------------------------------------------
    // Cron
    // -----------------------------------------------------------------------

    /// Register a recurring handler under `name`.
    ///
    /// The schedule is persisted so that exactly one worker in the namespace
    /// dispatches each due run; the handler itself lives in this process and
    /// runs on whichever of its workers wins the dispatch.
    pub async fn register_cron<F, Fut>(
        &self,
        spec: &str,
        name: &str,
        handler: F,
    ) -> Result<CronJob, EngineError>
    where
        F: Fn(CronInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: CronHandler = Arc::new(
            move |invocation: CronInvocation| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(handler(invocation))
            },
        );
        self.register_cron_target(spec, name, None, CronTarget::Handler(handler))
            .await
    }

    /// Register a recurring schedule that starts `workflow_name` with
    /// `payload` on every dispatch.
    pub async fn register_cron_workflow<P>(
        &self,
        spec: &str,
        name: &str,
        workflow_name: &str,
        payload: &P,
        options: StartOptions,
    ) -> Result<CronJob, EngineError>
    where
        P: Serialize + ?Sized,
    {
        options.validate()?;
        let input = marshal::encode(self.inner.marshaller.as_ref(), payload)?;
        let target = CronTarget::Workflow {
            workflow_name: workflow_name.to_string(),
            input,
            options,
        };
        self.register_cron_target(spec, name, Some(workflow_name), target)
            .await
    }

    async fn register_cron_target(
        &self,
        spec: &str,
        name: &str,
        workflow_name: Option<&str>,
        target: CronTarget,
    ) -> Result<CronJob, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "cron job name must not be empty".to_string(),
            ));
        }
        let schedule = CronSchedule::parse(spec)?;

        match self.inner.crons.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(EngineError::DuplicateCron(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(target);
            }
        }

        match self.persist_cron(&schedule, name, workflow_name).await {
            Ok(job) => {
                tracing::info!(
                    cron = name,
                    spec = schedule.as_str(),
                    next_run_at = %job.next_run_at,
                    "cron job registered"
                );
                Ok(job)
            }
            Err(e) => {
                self.inner.crons.remove(name);
                Err(e)
            }
        }
    }

    async fn persist_cron(
        &self,
        schedule: &CronSchedule,
        name: &str,
        workflow_name: Option<&str>,
    ) -> Result<CronJob, EngineError> {
        let now = clock::now();
        let existing = self
            .inner
            .store
            .get_cron_job(&self.inner.namespace, name)
            .await?;

        // An unchanged schedule keeps its pending run across restarts.
        let next_run_at = match &existing {
            Some(job) if job.enabled && job.cron_spec == schedule.as_str() => job.next_run_at,
            _ => schedule.next(now),
        };

        let job = CronJob {
            id: existing.as_ref().map_or_else(Uuid::now_v7, |job| job.id),
            namespace: self.inner.namespace.clone(),
            name: name.to_string(),
            cron_spec: schedule.as_str().to_string(),
            workflow_name: workflow_name.map(str::to_string),
            enabled: true,
            last_run_at: existing.as_ref().and_then(|job| job.last_run_at),
            next_run_at,
            created_at: existing.as_ref().map_or(now, |job| job.created_at),
            updated_at: now,
        };
        Ok(self.inner.store.upsert_cron_job(&job).await?)
    }

    pub async fn list_cron_jobs(&self) -> Result<Vec<CronJob>, EngineError> {
        Ok(self.inner.store.list_cron_jobs(&self.inner.namespace).await?)
    }

    /// Whether this process registered a handler for the cron job `name`.
    pub fn has_cron(&self, name: &str) -> bool {
        self.inner.crons.contains_key(name)
    }

    /// Names of the cron jobs this process has targets for, sorted.
    pub(crate) fn cron_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.crons.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub(crate) fn cron_target(&self, name: &str) -> Option<CronTarget> {
        self.inner.crons.get(name).map(|entry| entry.value().clone())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("namespace", &self.inner.namespace)
            .field("marshaller", &self.inner.marshaller.name())
            .field("crons", &self.inner.crons.len())
            .finish_non_exhaustive()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_start_options() {
        let options = StartOptions::default();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.timeout, Duration::from_secs(3600));
        assert_eq!(options.retry_backoff, Duration::from_secs(1));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = StartOptions::default().with_max_attempts(0).validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_builder_requires_store() {
        let err = Engine::builder().namespace("billing").build().unwrap_err();
        assert!(err.to_string().contains("store is required"));
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
