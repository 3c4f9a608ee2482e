//! Shared fixtures for the SQLite-backed scenario tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stepflow_core::engine::Engine;
use stepflow_core::store::Store;
use stepflow_core::worker::Worker;
use stepflow_infra::sqlite::SqliteStore;
use stepflow_types::config::WorkerConfig;
use stepflow_types::execution::{ExecutionStatus, WorkflowExecution};
use tokio::time::Instant;
use uuid::Uuid;

pub const NS: &str = "default";

/// A fresh migrated database in a temp dir that outlives the test.
pub async fn test_store() -> Arc<SqliteStore> {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stepflow.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    std::mem::forget(dir);
    Arc::new(SqliteStore::connect(&url).await.unwrap())
}

pub fn engine(store: Arc<SqliteStore>) -> Engine {
    Engine::builder()
        .store(store as Arc<dyn Store>)
        .namespace(NS)
        .build()
        .unwrap()
}

/// Worker settings scaled down so scenarios finish in milliseconds.
pub fn fast_config(worker_id: &str, concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        namespace: NS.to_string(),
        worker_id: Some(worker_id.to_string()),
        concurrency,
        poll_interval_ms: 20,
        heartbeat_interval_ms: 100,
        lease_duration_ms: 1_000,
        cron_interval_ms: 50,
        cron_batch_size: 10,
    }
}

pub fn worker(engine: &Engine, worker_id: &str, concurrency: usize) -> Worker {
    Worker::new(engine, fast_config(worker_id, concurrency)).unwrap()
}

/// Poll the execution until `done` accepts it or `timeout` elapses.
pub async fn wait_for_execution<F>(
    engine: &Engine,
    id: Uuid,
    timeout: Duration,
    mut done: F,
) -> Option<WorkflowExecution>
where
    F: FnMut(&WorkflowExecution) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let exec = engine.get_workflow(id).await.unwrap();
        if done(&exec) {
            return Some(exec);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until `n` executions are completed.
pub async fn wait_for_completed(engine: &Engine, n: usize, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let completed = engine
            .list_workflows(Some(ExecutionStatus::Completed), 10_000)
            .await
            .unwrap();
        if completed.len() >= n {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll a synchronous condition.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
