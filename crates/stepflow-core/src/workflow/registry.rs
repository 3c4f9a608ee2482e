//! Workflow registration.
//!
//! Workflow authors implement the typed [`Workflow`] trait. The worker only
//! sees executions as bytes, so each registered workflow is wrapped in an
//! object-safe adapter that decodes the input, runs the workflow and encodes
//! the output.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::marshal;

use super::context::WorkflowContext;
use super::error::WorkflowError;

// ---------------------------------------------------------------------------
// Workflow trait
// ---------------------------------------------------------------------------

/// A named, deterministic workflow.
///
/// `run` may be executed many times for the same execution (retries,
/// resumption after sleep, takeover after a crash). Everything with side
/// effects belongs inside [`super::step`] calls; the code between steps must
/// make the same step calls in the same order every time.
pub trait Workflow: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + 'static;

    /// Name executions are started under.
    fn name(&self) -> &str;

    fn run(
        &self,
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, WorkflowError>> + Send;
}

/// Object-safe view of a registered workflow.
pub trait ErasedWorkflow: Send + Sync {
    fn name(&self) -> &str;

    /// Decode `input`, run the workflow and encode its output.
    fn run_raw<'a>(
        &'a self,
        ctx: &'a WorkflowContext,
        input: &'a [u8],
    ) -> BoxFuture<'a, Result<Vec<u8>, WorkflowError>>;
}

struct TypedWorkflow<W>(W);

impl<W: Workflow> ErasedWorkflow for TypedWorkflow<W> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn run_raw<'a>(
        &'a self,
        ctx: &'a WorkflowContext,
        input: &'a [u8],
    ) -> BoxFuture<'a, Result<Vec<u8>, WorkflowError>> {
        Box::pin(async move {
            let input: W::Input = marshal::decode(ctx.marshaller(), input)?;
            let output = self.0.run(ctx, input).await?;
            Ok(marshal::encode(ctx.marshaller(), &output)?)
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowRegistry
// ---------------------------------------------------------------------------

/// Name -> handler map owned by a worker.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: DashMap<String, Arc<dyn ErasedWorkflow>>,
}

/// Returned when a name is registered twice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("workflow '{0}' is already registered")]
pub struct DuplicateWorkflow(pub String);

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<W: Workflow>(&self, workflow: W) -> Result<(), DuplicateWorkflow> {
        let name = workflow.name().to_string();
        match self.workflows.entry(name) {
            Entry::Occupied(entry) => Err(DuplicateWorkflow(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(TypedWorkflow(workflow)));
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ErasedWorkflow>> {
        self.workflows.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}
