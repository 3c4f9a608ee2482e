//! CLI command definitions for the `stepflow` binary.
//!
//! Every command works against the store directly; none of them run
//! workflow code. Executions are picked up by whichever worker process has
//! the workflow registered.

pub mod cron;
pub mod lease;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stepflow_types::execution::ExecutionStatus;
use uuid::Uuid;

/// Inspect and drive durable workflow executions.
#[derive(Parser)]
#[command(name = "stepflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to stepflow.toml (defaults to the data directory).
    #[arg(long, global = true, env = "STEPFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Namespace to operate in (overrides the config file).
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new workflow execution.
    Submit {
        /// Registered workflow name.
        workflow: String,

        /// Input payload as JSON (defaults to null).
        #[arg(long, short)]
        payload: Option<String>,

        /// Total attempts, including the first.
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        /// Upper bound on a single attempt, in seconds.
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,

        /// Base delay of the exponential retry backoff, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        backoff_ms: u64,
    },

    /// Show one execution.
    #[command(alias = "show")]
    Status {
        /// Execution ID.
        id: Uuid,
    },

    /// Show the step checkpoints of an execution.
    Steps {
        /// Execution ID.
        id: Uuid,
    },

    /// List executions, newest first.
    #[command(alias = "ls")]
    List {
        /// Only executions in this status (pending, running, sleeping,
        /// completed, failed).
        #[arg(long, short)]
        status: Option<ExecutionStatus>,

        /// Maximum number of rows.
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// List registered cron jobs.
    Crons,

    /// Delete expired leases in the namespace.
    CleanupLeases,
}
