//! Durable sleep.
//!
//! A sleep is recorded as a step whose `started_at` anchors the wake time.
//! While the wake time is in the future the call returns
//! [`WorkflowSuspended`]; the worker parks the execution in `sleeping`,
//! releases its lease and any worker resumes it once the time has passed.
//! The re-run replays earlier steps from their checkpoints, reaches the same
//! sleep again and this time completes it.

use std::time::Duration;

use stepflow_types::clock;
use stepflow_types::step::WorkflowStep;

use crate::marshal;

use super::context::WorkflowContext;
use super::error::{WorkflowError, WorkflowSuspended};

/// Suspend the workflow for `duration`.
///
/// The sleep is identified by its position in the step sequence and its
/// duration, so a deterministic workflow finds the same sleep on resume.
/// Use [`sleep_as`] when the position can vary between attempts.
pub async fn sleep(ctx: &WorkflowContext, duration: Duration) -> Result<(), WorkflowError> {
    let order = ctx.next_step_order();
    let name = format!("sleep:{order}:{}ms", duration.as_millis());
    sleep_step(ctx, &name, order, duration).await
}

/// Suspend the workflow for `duration` under an explicit key.
pub async fn sleep_as(
    ctx: &WorkflowContext,
    key: &str,
    duration: Duration,
) -> Result<(), WorkflowError> {
    let order = ctx.next_step_order();
    sleep_step(ctx, &format!("sleep:{key}"), order, duration).await
}

async fn sleep_step(
    ctx: &WorkflowContext,
    name: &str,
    order: i64,
    duration: Duration,
) -> Result<(), WorkflowError> {
    let duration = chrono::Duration::from_std(duration)
        .map_err(|e| anyhow::anyhow!("sleep duration out of range: {e}"))?;
    let namespace = ctx.namespace();
    let execution_id = ctx.execution_id();
    let store = ctx.store();
    let now = clock::now();

    match store.get_step(namespace, execution_id, name).await? {
        Some(existing) if existing.is_completed() => Ok(()),
        Some(existing) => {
            let wake_at = existing.started_at.unwrap_or(now) + duration;
            if now >= wake_at {
                let output = marshal::encode(ctx.marshaller(), &wake_at)?;
                store.complete_step(namespace, existing.id, &output).await?;
                tracing::debug!(%execution_id, step = name, "sleep elapsed");
                Ok(())
            } else {
                Err(WorkflowSuspended { until: wake_at }.into())
            }
        }
        None => {
            let record =
                WorkflowStep::start(namespace, execution_id, name, order, ctx.max_attempts());
            let wake_at = record.started_at.unwrap_or(now) + duration;
            store.create_step(&record).await?;
            tracing::debug!(%execution_id, step = name, %wake_at, "sleeping");
            Err(WorkflowSuspended { until: wake_at }.into())
        }
    }
}
