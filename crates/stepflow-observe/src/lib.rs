//! Observability setup for stepflow processes.

pub mod tracing_setup;
