//! Durable workflow primitives.
//!
//! - `context` -- per-attempt execution context handed to workflow code
//! - `error` -- the error type workflow code returns, including suspension
//! - `step` -- checkpointed, exactly-once-on-success steps
//! - `sleep` -- durable sleep that survives worker restarts
//! - `registry` -- typed workflow trait and the name -> handler map
//! - `retry` -- attempt accounting and exponential backoff

pub mod context;
pub mod error;
pub mod registry;
pub mod retry;
pub mod sleep;
pub mod step;

pub use context::WorkflowContext;
pub use error::{WorkflowError, WorkflowSuspended};
pub use registry::{Workflow, WorkflowRegistry};
pub use sleep::{sleep, sleep_as};
pub use step::step;
