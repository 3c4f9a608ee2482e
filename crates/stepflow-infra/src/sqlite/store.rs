//! SQLite implementation of the orchestrator's `Store`.
//!
//! Reads go to the reader pool. Every write, and every read that decides a
//! write (lease acquisition, fencing checks, upserts), runs on the
//! single-connection writer pool inside a transaction, so within one process
//! those sequences are serialized. Across processes SQLite's own write lock
//! serializes the transactions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Sqlite;
use sqlx::sqlite::SqliteRow;
use stepflow_core::store::{Store, StoreFuture};
use stepflow_types::clock;
use stepflow_types::cron::CronJob;
use stepflow_types::error::StoreError;
use stepflow_types::execution::{ExecutionStatus, WorkflowExecution};
use stepflow_types::lease::{Lease, LeaseKind};
use stepflow_types::step::WorkflowStep;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::rows::{
    cron_job_from_row, execution_from_row, lease_from_row, map_sqlx, millis, opt_millis,
    step_from_row, to_i64,
};

/// SQLite-backed [`Store`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: DatabasePool,
}

impl SqliteStore {
    /// Create a store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Open (and migrate) the database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = DatabasePool::new(database_url).await.map_err(|e| {
            tracing::error!(url = database_url, error = %e, "failed to open database");
            map_sqlx(e)
        })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

type Tx<'c> = sqlx::Transaction<'c, Sqlite>;

fn lease_expiry(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    let duration = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(duration)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

async fn fetch_lease(tx: &mut Tx<'_>, resource_id: &str) -> Result<Option<Lease>, StoreError> {
    let row: Option<SqliteRow> = sqlx::query("SELECT * FROM leases WHERE resource_id = ?1")
        .bind(resource_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx)?;
    row.as_ref().map(lease_from_row).transpose()
}

async fn write_lease(tx: &mut Tx<'_>, lease: &Lease) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO leases (resource_id, kind, namespace, worker_id, acquired_at, expires_at, heartbeat_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT(resource_id) DO UPDATE SET
               kind = excluded.kind,
               namespace = excluded.namespace,
               worker_id = excluded.worker_id,
               acquired_at = excluded.acquired_at,
               expires_at = excluded.expires_at,
               heartbeat_at = excluded.heartbeat_at"#,
    )
    .bind(&lease.resource_id)
    .bind(lease.kind.as_str())
    .bind(&lease.namespace)
    .bind(&lease.worker_id)
    .bind(millis(lease.acquired_at))
    .bind(millis(lease.expires_at))
    .bind(millis(lease.heartbeat_at))
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

/// Fencing check: the execution's lease row must still belong to `worker_id`.
async fn ensure_holder(tx: &mut Tx<'_>, id: Uuid, worker_id: &str) -> Result<(), StoreError> {
    match fetch_lease(tx, &id.to_string()).await? {
        Some(lease) if lease.worker_id == worker_id => Ok(()),
        Some(lease) => Err(StoreError::Conflict(format!(
            "execution {id} is leased by '{}', not '{worker_id}'",
            lease.worker_id
        ))),
        None => Err(StoreError::Conflict(format!(
            "execution {id} is not leased by '{worker_id}'"
        ))),
    }
}

/// Distinguish "missing" from "already completed" after a guarded step
/// update matched no row.
async fn step_update_miss(
    pool: &sqlx::SqlitePool,
    namespace: &str,
    step_id: Uuid,
) -> StoreError {
    let status: Result<Option<(String,)>, sqlx::Error> =
        sqlx::query_as("SELECT status FROM workflow_steps WHERE id = ?1 AND namespace = ?2")
            .bind(step_id.to_string())
            .bind(namespace)
            .fetch_optional(pool)
            .await;
    match status {
        Ok(Some(_)) => StoreError::Conflict(format!("step {step_id} is already completed")),
        Ok(None) => StoreError::NotFound,
        Err(e) => map_sqlx(e),
    }
}

impl Store for SqliteStore {
    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    fn create_workflow<'a>(&'a self, execution: &'a WorkflowExecution) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"INSERT INTO workflow_executions
                   (id, namespace, workflow_name, status, input_data, output_data,
                    max_attempts, remaining_attempts, next_retry_at, sleep_until,
                    timeout_ms, retry_backoff_ms, created_at, started_at, completed_at, error_message)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"#,
            )
            .bind(execution.id.to_string())
            .bind(&execution.namespace)
            .bind(&execution.workflow_name)
            .bind(execution.status.as_str())
            .bind(&execution.input_data)
            .bind(&execution.output_data)
            .bind(i64::from(execution.max_attempts))
            .bind(i64::from(execution.remaining_attempts))
            .bind(opt_millis(execution.next_retry_at))
            .bind(opt_millis(execution.sleep_until))
            .bind(to_i64(execution.timeout_ms))
            .bind(to_i64(execution.retry_backoff_ms))
            .bind(millis(execution.created_at))
            .bind(opt_millis(execution.started_at))
            .bind(opt_millis(execution.completed_at))
            .bind(&execution.error_message)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::Conflict(format!("execution {} already exists", execution.id))
                }
                other => map_sqlx(other),
            })?;
            Ok(())
        })
    }

    fn get_workflow<'a>(
        &'a self,
        namespace: &'a str,
        id: Uuid,
    ) -> StoreFuture<'a, Option<WorkflowExecution>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?1 AND namespace = ?2")
                .bind(id.to_string())
                .bind(namespace)
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;
            row.as_ref().map(execution_from_row).transpose()
        })
    }

    fn list_workflows<'a>(
        &'a self,
        namespace: &'a str,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> StoreFuture<'a, Vec<WorkflowExecution>> {
        Box::pin(async move {
            let rows = match status {
                Some(status) => {
                    sqlx::query(
                        "SELECT * FROM workflow_executions WHERE namespace = ?1 AND status = ?2 \
                         ORDER BY created_at DESC, id DESC LIMIT ?3",
                    )
                    .bind(namespace)
                    .bind(status.as_str())
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool.reader)
                    .await
                }
                None => {
                    sqlx::query(
                        "SELECT * FROM workflow_executions WHERE namespace = ?1 \
                         ORDER BY created_at DESC, id DESC LIMIT ?2",
                    )
                    .bind(namespace)
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool.reader)
                    .await
                }
            }
            .map_err(map_sqlx)?;
            rows.iter().map(execution_from_row).collect()
        })
    }

    fn get_pending_workflows<'a>(
        &'a self,
        namespace: &'a str,
        limit: u32,
        workflow_names: &'a [String],
    ) -> StoreFuture<'a, Vec<WorkflowExecution>> {
        Box::pin(async move {
            let now = millis(clock::now());
            let mut sql = String::from(
                r#"SELECT e.* FROM workflow_executions e
                   WHERE e.namespace = ?
                     AND (
                       e.status = 'pending'
                       OR (e.status = 'failed' AND e.next_retry_at IS NOT NULL AND e.next_retry_at <= ?)
                       OR (e.status = 'sleeping' AND e.sleep_until IS NOT NULL AND e.sleep_until <= ?)
                       OR (e.status = 'running' AND NOT EXISTS (
                             SELECT 1 FROM leases l WHERE l.resource_id = e.id AND l.expires_at > ?))
                     )"#,
            );
            if !workflow_names.is_empty() {
                let placeholders = vec!["?"; workflow_names.len()].join(", ");
                sql.push_str(&format!(" AND e.workflow_name IN ({placeholders})"));
            }
            sql.push_str(" ORDER BY e.created_at ASC, e.id ASC LIMIT ?");

            let mut query = sqlx::query(&sql).bind(namespace).bind(now).bind(now).bind(now);
            for name in workflow_names {
                query = query.bind(name);
            }
            let rows = query
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;
            rows.iter().map(execution_from_row).collect()
        })
    }

    fn acquire_workflow_lease<'a>(
        &'a self,
        execution_id: Uuid,
        namespace: &'a str,
        worker_id: &'a str,
        lease_duration: Duration,
    ) -> StoreFuture<'a, WorkflowExecution> {
        Box::pin(async move {
            let now = clock::now();
            let resource_id = execution_id.to_string();
            let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;

            let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?1 AND namespace = ?2")
                .bind(&resource_id)
                .bind(namespace)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            let mut execution = match row.as_ref().map(execution_from_row).transpose()? {
                Some(execution) => execution,
                None => return Err(StoreError::NotFound),
            };

            if !execution.is_eligible_at(now) {
                return Err(StoreError::NotAvailable { resource_id });
            }

            if let Some(existing) = fetch_lease(&mut tx, &resource_id).await? {
                // A live lease blocks everyone else, and blocks its own holder
                // while the execution is still running.
                let blocked = !existing.is_expired(now)
                    && (existing.worker_id != worker_id
                        || execution.status == ExecutionStatus::Running);
                if blocked {
                    return Err(StoreError::AlreadyLeased {
                        resource_id,
                        holder: existing.worker_id,
                    });
                }
            }

            let lease = Lease {
                resource_id: resource_id.clone(),
                kind: LeaseKind::Workflow,
                namespace: namespace.to_string(),
                worker_id: worker_id.to_string(),
                acquired_at: now,
                expires_at: lease_expiry(now, lease_duration),
                heartbeat_at: now,
            };
            write_lease(&mut tx, &lease).await?;

            sqlx::query(
                "UPDATE workflow_executions \
                 SET status = 'running', started_at = COALESCE(started_at, ?1), \
                     next_retry_at = NULL, sleep_until = NULL \
                 WHERE id = ?2",
            )
            .bind(millis(now))
            .bind(&resource_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

            tx.commit().await.map_err(map_sqlx)?;

            execution.status = ExecutionStatus::Running;
            execution.started_at.get_or_insert(now);
            execution.next_retry_at = None;
            execution.sleep_until = None;

            tracing::debug!(%execution_id, worker_id, "execution leased");
            Ok(execution)
        })
    }

    fn complete_workflow<'a>(
        &'a self,
        namespace: &'a str,
        id: Uuid,
        worker_id: &'a str,
        output: Option<&'a [u8]>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;
            ensure_holder(&mut tx, id, worker_id).await?;

            let result = sqlx::query(
                "UPDATE workflow_executions \
                 SET status = 'completed', output_data = ?1, completed_at = ?2, \
                     error_message = NULL, next_retry_at = NULL, sleep_until = NULL \
                 WHERE id = ?3 AND namespace = ?4",
            )
            .bind(output)
            .bind(millis(clock::now()))
            .bind(id.to_string())
            .bind(namespace)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }

            tx.commit().await.map_err(map_sqlx)?;
            Ok(())
        })
    }

    fn fail_workflow<'a>(
        &'a self,
        namespace: &'a str,
        id: Uuid,
        worker_id: &'a str,
        error_message: &'a str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;
            ensure_holder(&mut tx, id, worker_id).await?;

            // A final failure leaves no attempts behind, whatever was left.
            let result = sqlx::query(
                "UPDATE workflow_executions \
                 SET status = 'failed', error_message = ?1, next_retry_at = ?2, sleep_until = NULL, \
                     remaining_attempts = CASE WHEN ?2 IS NULL THEN 0 \
                                               ELSE MAX(remaining_attempts - 1, 0) END, \
                     completed_at = CASE WHEN ?2 IS NULL THEN ?3 ELSE NULL END \
                 WHERE id = ?4 AND namespace = ?5",
            )
            .bind(error_message)
            .bind(opt_millis(next_retry_at))
            .bind(millis(clock::now()))
            .bind(id.to_string())
            .bind(namespace)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }

            tx.commit().await.map_err(map_sqlx)?;
            Ok(())
        })
    }

    fn sleep_workflow<'a>(
        &'a self,
        namespace: &'a str,
        id: Uuid,
        worker_id: &'a str,
        sleep_until: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;
            ensure_holder(&mut tx, id, worker_id).await?;

            let result = sqlx::query(
                "UPDATE workflow_executions \
                 SET status = 'sleeping', sleep_until = ?1, next_retry_at = NULL \
                 WHERE id = ?2 AND namespace = ?3",
            )
            .bind(millis(sleep_until))
            .bind(id.to_string())
            .bind(namespace)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }

            tx.commit().await.map_err(map_sqlx)?;
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn get_step<'a>(
        &'a self,
        namespace: &'a str,
        execution_id: Uuid,
        step_name: &'a str,
    ) -> StoreFuture<'a, Option<WorkflowStep>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT * FROM workflow_steps \
                 WHERE namespace = ?1 AND execution_id = ?2 AND step_name = ?3",
            )
            .bind(namespace)
            .bind(execution_id.to_string())
            .bind(step_name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;
            row.as_ref().map(step_from_row).transpose()
        })
    }

    fn list_steps<'a>(
        &'a self,
        namespace: &'a str,
        execution_id: Uuid,
    ) -> StoreFuture<'a, Vec<WorkflowStep>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT * FROM workflow_steps WHERE namespace = ?1 AND execution_id = ?2 \
                 ORDER BY step_order ASC, started_at ASC",
            )
            .bind(namespace)
            .bind(execution_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;
            rows.iter().map(step_from_row).collect()
        })
    }

    fn create_step<'a>(&'a self, step: &'a WorkflowStep) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"INSERT INTO workflow_steps
                   (id, namespace, execution_id, step_name, step_order, status, output_data,
                    error_message, started_at, completed_at, max_attempts, remaining_attempts)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            )
            .bind(step.id.to_string())
            .bind(&step.namespace)
            .bind(step.execution_id.to_string())
            .bind(&step.step_name)
            .bind(step.step_order)
            .bind(step.status.as_str())
            .bind(&step.output_data)
            .bind(&step.error_message)
            .bind(opt_millis(step.started_at))
            .bind(opt_millis(step.completed_at))
            .bind(i64::from(step.max_attempts))
            .bind(i64::from(step.remaining_attempts))
            .execute(&self.pool.writer)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::Conflict(format!(
                        "step '{}' already exists for execution {}",
                        step.step_name, step.execution_id
                    ))
                }
                other => map_sqlx(other),
            })?;
            Ok(())
        })
    }

    fn restart_step<'a>(&'a self, namespace: &'a str, step_id: Uuid) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE workflow_steps \
                 SET status = 'running', error_message = NULL, completed_at = NULL, started_at = ?1, \
                     remaining_attempts = MAX(remaining_attempts - 1, 0) \
                 WHERE id = ?2 AND namespace = ?3 AND status != 'completed'",
            )
            .bind(millis(clock::now()))
            .bind(step_id.to_string())
            .bind(namespace)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;
            if result.rows_affected() == 0 {
                return Err(step_update_miss(&self.pool.writer, namespace, step_id).await);
            }
            Ok(())
        })
    }

    fn complete_step<'a>(
        &'a self,
        namespace: &'a str,
        step_id: Uuid,
        output: &'a [u8],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE workflow_steps \
                 SET status = 'completed', output_data = ?1, completed_at = ?2, error_message = NULL \
                 WHERE id = ?3 AND namespace = ?4 AND status != 'completed'",
            )
            .bind(output)
            .bind(millis(clock::now()))
            .bind(step_id.to_string())
            .bind(namespace)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;
            if result.rows_affected() == 0 {
                return Err(step_update_miss(&self.pool.writer, namespace, step_id).await);
            }
            Ok(())
        })
    }

    fn fail_step<'a>(
        &'a self,
        namespace: &'a str,
        step_id: Uuid,
        error_message: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE workflow_steps \
                 SET status = 'failed', error_message = ?1, completed_at = ?2 \
                 WHERE id = ?3 AND namespace = ?4 AND status != 'completed'",
            )
            .bind(error_message)
            .bind(millis(clock::now()))
            .bind(step_id.to_string())
            .bind(namespace)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;
            if result.rows_affected() == 0 {
                return Err(step_update_miss(&self.pool.writer, namespace, step_id).await);
            }
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    fn acquire_lease<'a>(
        &'a self,
        resource_id: &'a str,
        kind: LeaseKind,
        namespace: &'a str,
        worker_id: &'a str,
        lease_duration: Duration,
    ) -> StoreFuture<'a, Lease> {
        Box::pin(async move {
            let now = clock::now();
            let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;

            if let Some(existing) = fetch_lease(&mut tx, resource_id).await?
                && !existing.is_expired(now)
                && existing.worker_id != worker_id
            {
                return Err(StoreError::AlreadyLeased {
                    resource_id: resource_id.to_string(),
                    holder: existing.worker_id,
                });
            }

            let lease = Lease {
                resource_id: resource_id.to_string(),
                kind,
                namespace: namespace.to_string(),
                worker_id: worker_id.to_string(),
                acquired_at: now,
                expires_at: lease_expiry(now, lease_duration),
                heartbeat_at: now,
            };
            write_lease(&mut tx, &lease).await?;
            tx.commit().await.map_err(map_sqlx)?;
            Ok(lease)
        })
    }

    fn renew_lease<'a>(
        &'a self,
        resource_id: &'a str,
        namespace: &'a str,
        worker_id: &'a str,
        lease_duration: Duration,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let now = clock::now();
            let result = sqlx::query(
                "UPDATE leases SET expires_at = ?1, heartbeat_at = ?2 \
                 WHERE resource_id = ?3 AND namespace = ?4 AND worker_id = ?5",
            )
            .bind(millis(lease_expiry(now, lease_duration)))
            .bind(millis(now))
            .bind(resource_id)
            .bind(namespace)
            .bind(worker_id)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn release_lease<'a>(
        &'a self,
        resource_id: &'a str,
        namespace: &'a str,
        worker_id: &'a str,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM leases WHERE resource_id = ?1 AND namespace = ?2 AND worker_id = ?3",
            )
            .bind(resource_id)
            .bind(namespace)
            .bind(worker_id)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn get_lease<'a>(&'a self, resource_id: &'a str) -> StoreFuture<'a, Option<Lease>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM leases WHERE resource_id = ?1")
                .bind(resource_id)
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;
            row.as_ref().map(lease_from_row).transpose()
        })
    }

    fn cleanup_expired_leases<'a>(&'a self, namespace: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM leases WHERE namespace = ?1 AND expires_at <= ?2")
                .bind(namespace)
                .bind(millis(clock::now()))
                .execute(&self.pool.writer)
                .await
                .map_err(map_sqlx)?;
            Ok(result.rows_affected())
        })
    }

    // -----------------------------------------------------------------------
    // Cron jobs
    // -----------------------------------------------------------------------

    fn upsert_cron_job<'a>(&'a self, job: &'a CronJob) -> StoreFuture<'a, CronJob> {
        Box::pin(async move {
            let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;
            sqlx::query(
                r#"INSERT INTO cron_jobs
                   (id, namespace, name, cron_spec, workflow_name, enabled,
                    last_run_at, next_run_at, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                   ON CONFLICT(namespace, name) DO UPDATE SET
                       cron_spec = excluded.cron_spec,
                       workflow_name = excluded.workflow_name,
                       enabled = excluded.enabled,
                       next_run_at = excluded.next_run_at,
                       updated_at = excluded.updated_at"#,
            )
            .bind(job.id.to_string())
            .bind(&job.namespace)
            .bind(&job.name)
            .bind(&job.cron_spec)
            .bind(&job.workflow_name)
            .bind(job.enabled)
            .bind(opt_millis(job.last_run_at))
            .bind(millis(job.next_run_at))
            .bind(millis(job.created_at))
            .bind(millis(job.updated_at))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

            let row = sqlx::query("SELECT * FROM cron_jobs WHERE namespace = ?1 AND name = ?2")
                .bind(&job.namespace)
                .bind(&job.name)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            let stored = cron_job_from_row(&row)?;

            tx.commit().await.map_err(map_sqlx)?;
            Ok(stored)
        })
    }

    fn get_cron_job<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Option<CronJob>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM cron_jobs WHERE namespace = ?1 AND name = ?2")
                .bind(namespace)
                .bind(name)
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;
            row.as_ref().map(cron_job_from_row).transpose()
        })
    }

    fn list_cron_jobs<'a>(&'a self, namespace: &'a str) -> StoreFuture<'a, Vec<CronJob>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT * FROM cron_jobs WHERE namespace = ?1 ORDER BY name ASC")
                .bind(namespace)
                .fetch_all(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;
            rows.iter().map(cron_job_from_row).collect()
        })
    }

    fn get_due_cron_jobs<'a>(
        &'a self,
        namespace: &'a str,
        now: DateTime<Utc>,
        limit: u32,
        names: &'a [String],
    ) -> StoreFuture<'a, Vec<CronJob>> {
        Box::pin(async move {
            let mut sql = String::from(
                "SELECT * FROM cron_jobs WHERE namespace = ? AND enabled = 1 AND next_run_at <= ?",
            );
            if !names.is_empty() {
                let placeholders = vec!["?"; names.len()].join(", ");
                sql.push_str(&format!(" AND name IN ({placeholders})"));
            }
            sql.push_str(" ORDER BY next_run_at ASC, name ASC LIMIT ?");

            let mut query = sqlx::query(&sql).bind(namespace).bind(millis(now));
            for name in names {
                query = query.bind(name);
            }
            let rows = query
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;
            rows.iter().map(cron_job_from_row).collect()
        })
    }

    fn record_cron_run<'a>(
        &'a self,
        namespace: &'a str,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE cron_jobs SET last_run_at = ?1, next_run_at = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND namespace = ?5",
            )
            .bind(millis(last_run_at))
            .bind(millis(next_run_at))
            .bind(millis(clock::now()))
            .bind(id.to_string())
            .bind(namespace)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
