//! End-to-end tests for checkpointed steps, retries, sleeps and timeouts.
//!
//! Every test runs real workers against a temporary SQLite database.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use stepflow_core::engine::{EngineError, StartOptions};
use stepflow_core::store::Store;
use stepflow_core::workflow::{Workflow, WorkflowContext, WorkflowError, sleep, sleep_as, step};
use stepflow_types::clock;
use stepflow_types::execution::ExecutionStatus;
use stepflow_types::lease::LeaseKind;
use stepflow_types::step::{StepStatus, WorkflowStep};
use uuid::Uuid;

use common::{NS, engine, test_store, wait_for_completed, wait_for_execution, worker};

// ---------------------------------------------------------------------------
// Workflows under test
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    id: u32,
    amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Receipt {
    charge_id: String,
    tracking: String,
}

#[derive(Clone, Default)]
struct OrderCounters {
    charges: Arc<AtomicU32>,
    shipments: Arc<AtomicU32>,
    /// How many more shipment attempts fail before one succeeds.
    shipment_failures: Arc<AtomicU32>,
}

struct ProcessOrder {
    counters: OrderCounters,
}

impl Workflow for ProcessOrder {
    type Input = Order;
    type Output = Receipt;

    fn name(&self) -> &str {
        "process-order"
    }

    async fn run(&self, ctx: &WorkflowContext, order: Order) -> Result<Receipt, WorkflowError> {
        let order_id = order.id;

        let charges = Arc::clone(&self.counters.charges);
        let charge_id: String = step(ctx, "charge", |_| async move {
            charges.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(format!("ch_{order_id}_{}", order.amount_cents))
        })
        .await?;

        let shipments = Arc::clone(&self.counters.shipments);
        let failures = Arc::clone(&self.counters.shipment_failures);
        let tracking: String = step(ctx, "ship", |_| async move {
            let attempt = shipments.fetch_add(1, Ordering::SeqCst) + 1;
            if failures.load(Ordering::SeqCst) > 0 {
                failures.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("carrier unavailable");
            }
            anyhow::Ok(format!("trk_{order_id}_{attempt}"))
        })
        .await?;

        Ok(Receipt { charge_id, tracking })
    }
}

fn fast_retries(max_attempts: u32) -> StartOptions {
    StartOptions::default()
        .with_max_attempts(max_attempts)
        .with_retry_backoff(Duration::from_millis(10))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_steps_are_not_rerun_on_retry() {
    let store = test_store().await;
    let engine = engine(store);
    let counters = OrderCounters::default();
    counters.shipment_failures.store(2, Ordering::SeqCst);

    let worker = worker(&engine, "worker-a", 4);
    worker
        .register_workflow(ProcessOrder {
            counters: counters.clone(),
        })
        .unwrap();
    worker.start().unwrap();

    let id = engine
        .start_workflow(
            "process-order",
            &Order {
                id: 7,
                amount_cents: 1999,
            },
            fast_retries(3),
        )
        .await
        .unwrap();

    let done = wait_for_execution(&engine, id, Duration::from_secs(10), |exec| {
        exec.status == ExecutionStatus::Completed
    })
    .await
    .expect("workflow should complete");
    worker.shutdown().await;

    assert_eq!(counters.charges.load(Ordering::SeqCst), 1, "charge must run once");
    assert_eq!(counters.shipments.load(Ordering::SeqCst), 3);
    assert_eq!(done.remaining_attempts, 1);
    assert!(done.error_message.is_none());

    let receipt: Receipt = engine.workflow_output(id).await.unwrap().unwrap();
    assert_eq!(
        receipt,
        Receipt {
            charge_id: "ch_7_1999".to_string(),
            tracking: "trk_7_3".to_string(),
        }
    );

    let steps = engine.list_steps(id).await.unwrap();
    let summary: Vec<(&str, StepStatus)> = steps
        .iter()
        .map(|s| (s.step_name.as_str(), s.status))
        .collect();
    assert_eq!(
        summary,
        vec![("charge", StepStatus::Completed), ("ship", StepStatus::Completed)]
    );
}

#[tokio::test]
async fn retries_stop_after_max_attempts() {
    let store = test_store().await;
    let engine = engine(store);
    let counters = OrderCounters::default();
    counters.shipment_failures.store(u32::MAX, Ordering::SeqCst);

    let worker = worker(&engine, "worker-a", 4);
    worker
        .register_workflow(ProcessOrder {
            counters: counters.clone(),
        })
        .unwrap();
    worker.start().unwrap();

    let id = engine
        .start_workflow(
            "process-order",
            &Order {
                id: 1,
                amount_cents: 500,
            },
            fast_retries(3),
        )
        .await
        .unwrap();

    let failed = wait_for_execution(&engine, id, Duration::from_secs(10), |exec| exec.is_terminal())
        .await
        .expect("workflow should fail permanently");

    // Give a stray extra attempt the chance to show up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.shutdown().await;

    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.remaining_attempts, 0);
    assert!(failed.next_retry_at.is_none());
    assert!(
        failed
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("carrier unavailable")),
        "unexpected error: {:?}",
        failed.error_message
    );
    assert_eq!(counters.shipments.load(Ordering::SeqCst), 3);
    assert_eq!(counters.charges.load(Ordering::SeqCst), 1);
    assert!(engine.workflow_output::<Receipt>(id).await.unwrap().is_none());

    let ship = engine
        .list_steps(id)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.step_name == "ship")
        .unwrap();
    assert_eq!(ship.status, StepStatus::Failed);
}

// ---------------------------------------------------------------------------
// Sleep
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Reminder {
    runs: Arc<AtomicU32>,
    before: Arc<AtomicU32>,
    after: Arc<AtomicU32>,
}

impl Workflow for Reminder {
    type Input = u64;
    type Output = String;

    fn name(&self) -> &str {
        "reminder"
    }

    async fn run(&self, ctx: &WorkflowContext, delay_ms: u64) -> Result<String, WorkflowError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let before = Arc::clone(&self.before);
        step(ctx, "send-confirmation", |_| async move {
            before.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        })
        .await?;

        sleep(ctx, Duration::from_millis(delay_ms)).await?;

        let after = Arc::clone(&self.after);
        step(ctx, "send-reminder", |_| async move {
            after.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok("reminded".to_string())
        })
        .await
    }
}

#[tokio::test]
async fn sleep_suspends_and_resumes_without_replaying_steps() {
    let store = test_store().await;
    let engine = engine(store);
    let before = Arc::new(AtomicU32::new(0));
    let after = Arc::new(AtomicU32::new(0));

    let worker = worker(&engine, "worker-a", 2);
    worker
        .register_workflow(Reminder {
            before: Arc::clone(&before),
            after: Arc::clone(&after),
            ..Default::default()
        })
        .unwrap();
    worker.start().unwrap();

    let started = Instant::now();
    let id = engine
        .start_workflow("reminder", &400u64, StartOptions::default())
        .await
        .unwrap();

    let sleeping = wait_for_execution(&engine, id, Duration::from_secs(5), |exec| {
        exec.status == ExecutionStatus::Sleeping
    })
    .await
    .expect("workflow should go to sleep");
    assert!(sleeping.sleep_until.is_some());
    assert_eq!(sleeping.remaining_attempts, sleeping.max_attempts);
    assert_eq!(after.load(Ordering::SeqCst), 0);

    wait_for_execution(&engine, id, Duration::from_secs(10), |exec| {
        exec.status == ExecutionStatus::Completed
    })
    .await
    .expect("workflow should complete after waking");
    worker.shutdown().await;

    let output: String = engine.workflow_output(id).await.unwrap().unwrap();

    assert_eq!(output, "reminded");
    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);

    let done = engine.get_workflow(id).await.unwrap();
    assert_eq!(done.remaining_attempts, done.max_attempts, "sleeping must not cost attempts");

    let steps = engine.list_steps(id).await.unwrap();
    assert_eq!(steps.len(), 3);
    assert!(steps[1].step_name.starts_with("sleep:"));
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn early_wakeup_resuspends_until_the_original_wake_time() {
    let store = test_store().await;
    let engine = engine(Arc::clone(&store));
    let reminder = Reminder::default();
    let runs = Arc::clone(&reminder.runs);
    let after = Arc::clone(&reminder.after);

    let worker = worker(&engine, "worker-a", 2);
    worker.register_workflow(reminder).unwrap();
    worker.start().unwrap();

    let id = engine
        .start_workflow("reminder", &60_000u64, StartOptions::default())
        .await
        .unwrap();

    let sleeping = wait_for_execution(&engine, id, Duration::from_secs(5), |exec| {
        exec.status == ExecutionStatus::Sleeping
    })
    .await
    .expect("workflow should go to sleep");
    let wake_at = sleeping.sleep_until.expect("sleep_until is set");
    let nap = sleep_step_of(&engine, id).await;

    // Pull the wake time into the past so a worker re-runs the execution
    // long before the sleep has elapsed.
    let resource_id = id.to_string();
    let mut held = false;
    for _ in 0..200 {
        if store
            .acquire_lease(
                &resource_id,
                LeaseKind::Workflow,
                NS,
                "operator",
                Duration::from_secs(5),
            )
            .await
            .is_ok()
        {
            held = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(held, "worker should release the lease after parking");
    store
        .sleep_workflow(NS, id, "operator", clock::now() - chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert!(store.release_lease(&resource_id, NS, "operator").await.unwrap());

    let resuspended = wait_for_execution(&engine, id, Duration::from_secs(5), |exec| {
        runs.load(Ordering::SeqCst) >= 2
            && exec.status == ExecutionStatus::Sleeping
            && exec.sleep_until.is_some_and(|t| t > clock::now())
    })
    .await
    .expect("early re-run should park the execution again");
    worker.shutdown().await;

    assert_eq!(resuspended.sleep_until, Some(wake_at));
    assert_eq!(resuspended.remaining_attempts, resuspended.max_attempts);
    assert_eq!(after.load(Ordering::SeqCst), 0);

    let nap_again = sleep_step_of(&engine, id).await;
    assert_eq!(nap_again.id, nap.id);
    assert_eq!(nap_again.started_at, nap.started_at);
    assert_eq!(nap_again.status, StepStatus::Running);
}

async fn sleep_step_of(engine: &stepflow_core::engine::Engine, id: Uuid) -> WorkflowStep {
    engine
        .list_steps(id)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.step_name.starts_with("sleep:"))
        .expect("sleep step is recorded")
}

struct TwoNaps;

impl Workflow for TwoNaps {
    type Input = ();
    type Output = String;

    fn name(&self) -> &str {
        "two-naps"
    }

    async fn run(&self, ctx: &WorkflowContext, _input: ()) -> Result<String, WorkflowError> {
        sleep_as(ctx, "first", Duration::from_millis(150)).await?;
        sleep_as(ctx, "second", Duration::from_millis(150)).await?;
        Ok("rested".to_string())
    }
}

#[tokio::test]
async fn keyed_sleeps_of_equal_duration_are_distinct() {
    let store = test_store().await;
    let engine = engine(store);

    let worker = worker(&engine, "worker-a", 2);
    worker.register_workflow(TwoNaps).unwrap();
    worker.start().unwrap();

    let started = Instant::now();
    let id = engine
        .start_workflow("two-naps", &(), StartOptions::default())
        .await
        .unwrap();

    wait_for_execution(&engine, id, Duration::from_secs(10), |exec| {
        exec.status == ExecutionStatus::Completed
    })
    .await
    .expect("workflow should complete after both sleeps");
    worker.shutdown().await;

    assert!(started.elapsed() >= Duration::from_millis(300));
    let output: String = engine.workflow_output(id).await.unwrap().unwrap();
    assert_eq!(output, "rested");

    let steps = engine.list_steps(id).await.unwrap();
    let names: Vec<&str> = steps.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(names, vec!["sleep:first", "sleep:second"]);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    assert!(steps[1].started_at >= steps[0].completed_at);
}

// ---------------------------------------------------------------------------
// Timeout
// ---------------------------------------------------------------------------

struct Stuck;

impl Workflow for Stuck {
    type Input = ();
    type Output = ();

    fn name(&self) -> &str {
        "stuck"
    }

    async fn run(&self, _ctx: &WorkflowContext, _input: ()) -> Result<(), WorkflowError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test]
async fn attempt_timeout_counts_as_failure() {
    let store = test_store().await;
    let engine = engine(store);
    let worker = worker(&engine, "worker-a", 1);
    worker.register_workflow(Stuck).unwrap();
    worker.start().unwrap();

    let id = engine
        .start_workflow(
            "stuck",
            &(),
            StartOptions::default()
                .with_max_attempts(1)
                .with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    let failed = wait_for_execution(&engine, id, Duration::from_secs(5), |exec| exec.is_terminal())
        .await
        .expect("timed out workflow should fail");
    worker.shutdown().await;

    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert!(failed.error_message.unwrap().contains("timed out"));
}

// ---------------------------------------------------------------------------
// Many workers
// ---------------------------------------------------------------------------

struct Tally {
    runs: Arc<Mutex<HashMap<Uuid, u32>>>,
}

impl Workflow for Tally {
    type Input = u32;
    type Output = u32;

    fn name(&self) -> &str {
        "tally"
    }

    async fn run(&self, ctx: &WorkflowContext, n: u32) -> Result<u32, WorkflowError> {
        let runs = Arc::clone(&self.runs);
        let execution_id = ctx.execution_id();
        step(ctx, "count", |_| async move {
            *runs.lock().unwrap().entry(execution_id).or_insert(0) += 1;
            anyhow::Ok(n * 2)
        })
        .await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_executions_across_five_workers_run_once_each() {
    let store = test_store().await;
    let engine = engine(store);
    let runs = Arc::new(Mutex::new(HashMap::new()));

    let workers: Vec<_> = (0..5)
        .map(|i| {
            let w = worker(&engine, &format!("worker-{i}"), 2);
            w.register_workflow(Tally {
                runs: Arc::clone(&runs),
            })
            .unwrap();
            w
        })
        .collect();

    let mut ids = Vec::new();
    for n in 0..100u32 {
        ids.push(
            engine
                .start_workflow("tally", &n, StartOptions::default())
                .await
                .unwrap(),
        );
    }
    for w in &workers {
        w.start().unwrap();
    }

    let all_done = wait_for_completed(&engine, 100, Duration::from_secs(60)).await;

    for w in &workers {
        w.shutdown().await;
    }
    assert!(all_done, "all executions should complete");

    let runs = runs.lock().unwrap();
    assert_eq!(runs.len(), 100);
    for id in &ids {
        assert_eq!(runs.get(id), Some(&1), "execution {id} ran its step more than once");
    }

    for (n, id) in ids.iter().enumerate() {
        let doubled: u32 = engine.workflow_output(*id).await.unwrap().unwrap();
        assert_eq!(doubled, n as u32 * 2);
    }
}

#[tokio::test]
async fn invalid_start_options_are_rejected() {
    let store = test_store().await;
    let engine = engine(store);

    let err = engine
        .start_workflow("tally", &1u32, StartOptions::default().with_max_attempts(0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));

    let err = engine.get_workflow(Uuid::now_v7()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}
