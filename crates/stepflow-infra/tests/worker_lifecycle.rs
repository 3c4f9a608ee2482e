//! Worker start/shutdown, lease loss and registration errors.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use stepflow_core::engine::StartOptions;
use stepflow_core::store::Store;
use stepflow_core::worker::{Worker, WorkerError};
use stepflow_core::workflow::{Workflow, WorkflowContext, WorkflowError, step};
use stepflow_types::execution::ExecutionStatus;
use stepflow_types::lease::LeaseKind;

use common::{NS, engine, fast_config, test_store, wait_for_execution, wait_until, worker};

/// Parks in its only step on the first run; later runs finish at once.
struct ParkOnce {
    runs: Arc<AtomicU32>,
}

impl Workflow for ParkOnce {
    type Input = ();
    type Output = u32;

    fn name(&self) -> &str {
        "park-once"
    }

    async fn run(&self, ctx: &WorkflowContext, _input: ()) -> Result<u32, WorkflowError> {
        let runs = Arc::clone(&self.runs);
        step(ctx, "park", |_| async move {
            let run = runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run == 1 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            anyhow::Ok(run)
        })
        .await
    }
}

#[tokio::test]
async fn shutdown_withdraws_running_execution_for_takeover() {
    let store = test_store().await;
    let engine = engine(store.clone());
    let runs = Arc::new(AtomicU32::new(0));

    let first = worker(&engine, "worker-a", 2);
    first
        .register_workflow(ParkOnce {
            runs: Arc::clone(&runs),
        })
        .unwrap();
    first.start().unwrap();

    let id = engine
        .start_workflow("park-once", &(), StartOptions::default())
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || runs.load(Ordering::SeqCst) == 1).await);
    assert_eq!(first.active_count(), 1);

    tokio::time::timeout(Duration::from_secs(5), first.shutdown())
        .await
        .expect("shutdown should not wait for the parked step");
    assert_eq!(first.active_count(), 0);

    let parked = engine.get_workflow(id).await.unwrap();
    assert_eq!(parked.status, ExecutionStatus::Running);
    assert_eq!(parked.remaining_attempts, parked.max_attempts);
    assert!(store.get_lease(&id.to_string()).await.unwrap().is_none());

    let second = worker(&engine, "worker-b", 2);
    second
        .register_workflow(ParkOnce {
            runs: Arc::clone(&runs),
        })
        .unwrap();
    second.start().unwrap();

    let done = wait_for_execution(&engine, id, Duration::from_secs(5), |exec| {
        exec.status == ExecutionStatus::Completed
    })
    .await
    .expect("second worker should finish the execution");
    second.shutdown().await;

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(done.remaining_attempts, done.max_attempts);
    let output: u32 = engine.workflow_output(id).await.unwrap().unwrap();
    assert_eq!(output, 2);
}

#[tokio::test]
async fn lost_lease_cancels_execution() {
    let store = test_store().await;
    let engine = engine(store.clone());
    let runs = Arc::new(AtomicU32::new(0));

    let w = worker(&engine, "worker-a", 1);
    w.register_workflow(ParkOnce {
        runs: Arc::clone(&runs),
    })
    .unwrap();
    w.start().unwrap();

    let id = engine
        .start_workflow("park-once", &(), StartOptions::default())
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || runs.load(Ordering::SeqCst) == 1).await);

    // Another party takes the lease out from under the worker.
    let resource_id = id.to_string();
    assert!(store.release_lease(&resource_id, NS, "worker-a").await.unwrap());
    store
        .acquire_lease(
            &resource_id,
            LeaseKind::Workflow,
            NS,
            "intruder",
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || w.active_count() == 0).await,
        "heartbeat should cancel the execution"
    );
    w.shutdown().await;

    // The withdrawn attempt recorded nothing and left the intruder's lease alone.
    let exec = engine.get_workflow(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Running);
    assert_eq!(exec.remaining_attempts, exec.max_attempts);
    let lease = store.get_lease(&resource_id).await.unwrap().unwrap();
    assert_eq!(lease.worker_id, "intruder");
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let store = test_store().await;
    let engine = engine(store);
    let w = worker(&engine, "worker-a", 1);

    w.start().unwrap();
    assert!(matches!(w.start(), Err(WorkerError::AlreadyStarted)));
    w.shutdown().await;
}

#[tokio::test]
async fn duplicate_workflow_registration_is_rejected() {
    let store = test_store().await;
    let engine = engine(store);
    let w = worker(&engine, "worker-a", 1);
    let runs = Arc::new(AtomicU32::new(0));

    w.register_workflow(ParkOnce {
        runs: Arc::clone(&runs),
    })
    .unwrap();
    let err = w.register_workflow(ParkOnce { runs }).unwrap_err();
    assert!(matches!(err, WorkerError::DuplicateWorkflow(_)));
}

#[tokio::test]
async fn invalid_worker_config_is_rejected() {
    let store = test_store().await;
    let engine = engine(store);

    let mut config = fast_config("worker-a", 0);
    assert!(matches!(
        Worker::new(&engine, config.clone()),
        Err(WorkerError::InvalidConfig(_))
    ));

    config.concurrency = 1;
    config.namespace = "elsewhere".to_string();
    let err = Worker::new(&engine, config).err().unwrap();
    assert!(err.to_string().contains("does not match"));
}
