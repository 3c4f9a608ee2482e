//! Checkpointed steps.
//!
//! A step is a named unit of work inside a workflow whose successful result
//! is persisted. When the workflow is re-run (after a crash, a retry or a
//! sleep), a step that already completed returns its stored output without
//! running its body again.

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use stepflow_types::step::WorkflowStep;

use crate::marshal::{self, MarshalError};

use super::context::WorkflowContext;
use super::error::WorkflowError;

/// Run `f` as the step `name` of the current execution, at most once to
/// success.
///
/// - completed checkpoint: the stored output is decoded and returned, `f`
///   is not called
/// - failed or interrupted checkpoint: the record is reset to `running` and
///   `f` is called again
/// - no checkpoint: a `running` record is created and `f` is called
///
/// On success the marshalled output is checkpointed before it is returned.
/// On failure the step is marked `failed` and the error is returned as
/// [`WorkflowError::Step`], which consumes one attempt of the workflow.
///
/// Step names must be unique within a workflow and must not depend on
/// anything that changes between attempts.
pub async fn step<T, F, Fut>(ctx: &WorkflowContext, name: &str, f: F) -> Result<T, WorkflowError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(WorkflowContext) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let order = ctx.next_step_order();
    let namespace = ctx.namespace();
    let execution_id = ctx.execution_id();
    let store = ctx.store();

    let step_id = match store.get_step(namespace, execution_id, name).await? {
        Some(existing) if existing.is_completed() => {
            tracing::debug!(%execution_id, step = name, "replaying checkpointed step");
            let bytes = existing.output_data.ok_or_else(|| {
                MarshalError::Decode(format!("step '{name}' completed without output"))
            })?;
            return Ok(marshal::decode(ctx.marshaller(), &bytes)?);
        }
        Some(existing) => {
            tracing::debug!(
                %execution_id,
                step = name,
                previous = %existing.status,
                "re-running step"
            );
            store.restart_step(namespace, existing.id).await?;
            existing.id
        }
        None => {
            let record =
                WorkflowStep::start(namespace, execution_id, name, order, ctx.max_attempts());
            store.create_step(&record).await?;
            record.id
        }
    };

    if ctx.is_cancelled() {
        return Err(WorkflowError::Cancelled);
    }

    match f(ctx.clone()).await {
        Ok(value) => {
            let bytes = match marshal::encode(ctx.marshaller(), &value) {
                Ok(bytes) => bytes,
                Err(e) => {
                    let message = e.to_string();
                    if let Err(store_err) = store.fail_step(namespace, step_id, &message).await {
                        tracing::warn!(%execution_id, step = name, error = %store_err, "failed to record step failure");
                    }
                    return Err(e.into());
                }
            };
            store.complete_step(namespace, step_id, &bytes).await?;
            tracing::debug!(%execution_id, step = name, order, "step completed");
            Ok(value)
        }
        Err(source) => {
            let message = format!("{source:#}");
            tracing::debug!(%execution_id, step = name, error = %message, "step failed");
            if let Err(store_err) = store.fail_step(namespace, step_id, &message).await {
                tracing::warn!(%execution_id, step = name, error = %store_err, "failed to record step failure");
            }
            Err(WorkflowError::Step {
                name: name.to_string(),
                source,
            })
        }
    }
}
