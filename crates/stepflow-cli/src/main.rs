//! stepflow operator CLI.
//!
//! Binary name: `stepflow`
//!
//! Parses CLI arguments, sets up tracing, opens the store for the configured
//! namespace, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use stepflow_observe::tracing_setup::{
    LogFormat, TracingOptions, filter_for_verbosity, init_tracing, shutdown_tracing,
};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = TracingOptions {
        default_filter: filter_for_verbosity(cli.verbose, cli.quiet).to_string(),
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Text
        },
        otel: cli.otel,
    };
    if let Err(e) = init_tracing(&options) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init(cli.config.as_deref(), cli.namespace.clone()).await?;

    let outcome = match cli.command {
        Commands::Submit {
            workflow,
            payload,
            max_attempts,
            timeout_secs,
            backoff_ms,
        } => {
            cli::workflow::submit(
                &state,
                &workflow,
                payload.as_deref(),
                max_attempts,
                timeout_secs,
                backoff_ms,
                cli.json,
            )
            .await
        }

        Commands::Status { id } => cli::workflow::status(&state, id, cli.json).await,

        Commands::Steps { id } => cli::workflow::steps(&state, id, cli.json).await,

        Commands::List { status, limit } => {
            cli::workflow::list(&state, status, limit, cli.json).await
        }

        Commands::Crons => cli::cron::list_crons(&state, cli.json).await,

        Commands::CleanupLeases => cli::lease::cleanup_leases(&state, cli.json).await,
    };

    state.close().await;
    outcome
}
