//! Execution commands: submit, status, steps, list.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use stepflow_core::engine::{EngineError, StartOptions};
use stepflow_core::marshal;
use stepflow_types::execution::{ExecutionStatus, WorkflowExecution};
use stepflow_types::step::{StepStatus, WorkflowStep};
use uuid::Uuid;

use crate::state::AppState;

/// Start a new execution of `workflow`.
pub async fn submit(
    state: &AppState,
    workflow: &str,
    payload: Option<&str>,
    max_attempts: u32,
    timeout_secs: u64,
    backoff_ms: u64,
    json: bool,
) -> Result<()> {
    let payload: Value = match payload {
        Some(raw) => serde_json::from_str(raw).context("--payload is not valid JSON")?,
        None => Value::Null,
    };

    let options = StartOptions::default()
        .with_max_attempts(max_attempts)
        .with_timeout(Duration::from_secs(timeout_secs))
        .with_retry_backoff(Duration::from_millis(backoff_ms));

    let id = state
        .engine
        .start_workflow(workflow, &payload, options)
        .await?;

    if json {
        let result = serde_json::json!({
            "id": id,
            "workflow": workflow,
            "namespace": state.namespace(),
            "status": ExecutionStatus::Pending,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Submitted {} in namespace {}",
        style("✓").green().bold(),
        style(workflow).cyan().bold(),
        style(state.namespace()).cyan(),
    );
    println!("  ID: {}", style(id).bold());
    println!(
        "     Follow it with: stepflow status {id} -n {}",
        state.namespace()
    );
    println!();

    Ok(())
}

/// Show one execution with its decoded input and output.
pub async fn status(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    let execution = get_execution(state, id).await?;
    let input = decode_payload(state, Some(&execution.input_data));
    let output = decode_payload(state, execution.output_data.as_deref());

    if json {
        let result = serde_json::json!({
            "id": execution.id,
            "workflow": execution.workflow_name,
            "namespace": execution.namespace,
            "status": execution.status,
            "input": input,
            "output": output,
            "max_attempts": execution.max_attempts,
            "remaining_attempts": execution.remaining_attempts,
            "next_retry_at": execution.next_retry_at,
            "sleep_until": execution.sleep_until,
            "timeout_ms": execution.timeout_ms,
            "retry_backoff_ms": execution.retry_backoff_ms,
            "created_at": execution.created_at,
            "started_at": execution.started_at,
            "completed_at": execution.completed_at,
            "error": execution.error_message,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style(&execution.workflow_name).cyan().bold(),
        style(execution.id).dim(),
    );
    println!();
    println!("  Status:     {}", styled_status(execution.status));
    println!(
        "  Attempts:   {} of {}",
        execution.attempts_used(),
        execution.max_attempts
    );
    println!("  Created:    {}", format_time(Some(execution.created_at)));
    println!("  Started:    {}", format_time(execution.started_at));
    if execution.completed_at.is_some() {
        println!("  Completed:  {}", format_time(execution.completed_at));
    }
    if execution.status == ExecutionStatus::Sleeping {
        println!("  Wakes at:   {}", format_time(execution.sleep_until));
    }
    if execution.status == ExecutionStatus::Failed && execution.next_retry_at.is_some() {
        println!("  Retry at:   {}", format_time(execution.next_retry_at));
    }
    println!("  Input:      {}", preview(&input));
    if output != Value::Null {
        println!("  Output:     {}", preview(&output));
    }
    if let Some(err) = &execution.error_message {
        println!("  Error:      {}", style(err).red());
    }
    println!();

    Ok(())
}

/// Show the steps of an execution in order.
pub async fn steps(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    // Resolve the execution first so an unknown ID is an error, not an empty table.
    let execution = get_execution(state, id).await?;
    let steps = state.engine.list_steps(id).await?;

    if json {
        let rows: Vec<Value> = steps.iter().map(|s| step_json(state, s)).collect();
        let result = serde_json::json!({
            "execution_id": id,
            "steps": rows,
            "count": steps.len(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if steps.is_empty() {
        println!();
        println!(
            "  {} No steps recorded for {} yet.",
            style("i").blue().bold(),
            style(&execution.workflow_name).cyan(),
        );
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  Steps of {} ({} recorded)",
        style(&execution.workflow_name).cyan(),
        steps.len(),
    );
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Step").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Started").fg(Color::White),
        Cell::new("Completed").fg(Color::White),
        Cell::new("Output / Error").fg(Color::White),
    ]);

    for step in &steps {
        let detail = match (&step.error_message, step.status) {
            (Some(err), StepStatus::Failed | StepStatus::Running) => {
                Cell::new(truncate(err, 60)).fg(Color::Red)
            }
            _ => {
                let output = decode_payload(state, step.output_data.as_deref());
                Cell::new(preview(&output)).fg(Color::DarkGrey)
            }
        };

        table.add_row(vec![
            Cell::new(step.step_order),
            Cell::new(&step.step_name).fg(Color::Cyan),
            Cell::new(step.status.as_str()).fg(step_status_color(step.status)),
            Cell::new(format_time(step.started_at)),
            Cell::new(format_time(step.completed_at)),
            detail,
        ]);
    }

    println!("{table}");
    println!();

    Ok(())
}

/// List executions in the namespace.
pub async fn list(
    state: &AppState,
    status: Option<ExecutionStatus>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let executions = state.engine.list_workflows(status, limit).await?;

    if json {
        let rows: Vec<Value> = executions
            .iter()
            .map(|e| {
                serde_json::json!({
                    "id": e.id,
                    "workflow": e.workflow_name,
                    "status": e.status,
                    "remaining_attempts": e.remaining_attempts,
                    "created_at": e.created_at,
                    "completed_at": e.completed_at,
                    "error": e.error_message,
                })
            })
            .collect();
        let result = serde_json::json!({
            "namespace": state.namespace(),
            "database": state.database_url,
            "executions": rows,
            "count": executions.len(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!(
            "  {} No executions in namespace '{}'.",
            style("i").blue().bold(),
            style(state.namespace()).cyan(),
        );
        println!("     Start one with: stepflow submit <workflow> --payload '<json>'");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  Executions in '{}' ({} shown)",
        style(state.namespace()).cyan(),
        executions.len(),
    );
    println!("  {}", style(&state.database_url).dim());
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Workflow").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Attempts").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);

    for execution in &executions {
        table.add_row(vec![
            Cell::new(execution.id).fg(Color::DarkGrey),
            Cell::new(&execution.workflow_name).fg(Color::Cyan),
            Cell::new(execution.status.as_str()).fg(execution_status_color(execution.status)),
            Cell::new(format!(
                "{}/{}",
                execution.attempts_used(),
                execution.max_attempts
            )),
            Cell::new(format_time(Some(execution.created_at))),
        ]);
    }

    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn get_execution(state: &AppState, id: Uuid) -> Result<WorkflowExecution> {
    match state.engine.get_workflow(id).await {
        Ok(execution) => Ok(execution),
        Err(EngineError::NotFound(_)) => anyhow::bail!(
            "Execution {id} not found in namespace '{}'",
            state.namespace()
        ),
        Err(e) => Err(e.into()),
    }
}

fn step_json(state: &AppState, step: &WorkflowStep) -> Value {
    serde_json::json!({
        "id": step.id,
        "order": step.step_order,
        "name": step.step_name,
        "status": step.status,
        "output": decode_payload(state, step.output_data.as_deref()),
        "error": step.error_message,
        "started_at": step.started_at,
        "completed_at": step.completed_at,
        "remaining_attempts": step.remaining_attempts,
    })
}

/// Decode a stored payload for display. Undecodable bytes are shown as a
/// placeholder rather than failing the command.
fn decode_payload(state: &AppState, bytes: Option<&[u8]>) -> Value {
    match bytes {
        None => Value::Null,
        Some(bytes) => marshal::decode::<Value>(state.engine.marshaller().as_ref(), bytes)
            .unwrap_or_else(|_| Value::String(format!("<{} undecodable bytes>", bytes.len()))),
    }
}

fn preview(value: &Value) -> String {
    truncate(&value.to_string(), 60)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

fn format_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn styled_status(status: ExecutionStatus) -> console::StyledObject<&'static str> {
    let text = style(status.as_str()).bold();
    match status {
        ExecutionStatus::Completed => text.green(),
        ExecutionStatus::Failed => text.red(),
        ExecutionStatus::Running => text.cyan(),
        ExecutionStatus::Sleeping => text.blue(),
        ExecutionStatus::Pending => text.yellow(),
    }
}

fn execution_status_color(status: ExecutionStatus) -> Color {
    match status {
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Running => Color::Cyan,
        ExecutionStatus::Sleeping => Color::Blue,
        ExecutionStatus::Pending => Color::Yellow,
    }
}

fn step_status_color(status: StepStatus) -> Color {
    match status {
        StepStatus::Completed => Color::Green,
        StepStatus::Failed => Color::Red,
        _ => Color::Yellow,
    }
}
