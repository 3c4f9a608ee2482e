//! Cron job listing.

use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use stepflow_types::clock;

use crate::state::AppState;

/// List cron jobs registered in the namespace, earliest next run first.
pub async fn list_crons(state: &AppState, json: bool) -> Result<()> {
    let mut jobs = state.engine.list_cron_jobs().await?;
    jobs.sort_by_key(|job| job.next_run_at);
    let now = clock::now();

    if json {
        let result = serde_json::json!({
            "namespace": state.namespace(),
            "cron_jobs": jobs,
            "count": jobs.len(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!();
        println!(
            "  {} No cron jobs in namespace '{}'.",
            style("i").blue().bold(),
            style(state.namespace()).cyan(),
        );
        println!("     Cron jobs are registered by worker processes at startup.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  Cron jobs in '{}' ({} registered)",
        style(state.namespace()).cyan(),
        jobs.len(),
    );
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("Schedule").fg(Color::White),
        Cell::new("Target").fg(Color::White),
        Cell::new("Enabled").fg(Color::White),
        Cell::new("Last Run").fg(Color::White),
        Cell::new("Next Run").fg(Color::White),
    ]);

    for job in &jobs {
        let target = job
            .workflow_name
            .as_deref()
            .map(|name| format!("workflow {name}"))
            .unwrap_or_else(|| "handler".to_string());

        let next_run = if job.is_due(now) {
            Cell::new(format!("{} (due)", format_relative(job.next_run_at, now))).fg(Color::Yellow)
        } else {
            Cell::new(format_relative(job.next_run_at, now))
        };

        table.add_row(vec![
            Cell::new(&job.name).fg(Color::Cyan),
            Cell::new(&job.cron_spec),
            Cell::new(target).fg(Color::DarkGrey),
            if job.enabled {
                Cell::new("yes").fg(Color::Green)
            } else {
                Cell::new("no").fg(Color::Red)
            },
            Cell::new(
                job.last_run_at
                    .map(|t| format_relative(t, now))
                    .unwrap_or_else(|| "never".to_string()),
            ),
            next_run,
        ]);
    }

    println!("{table}");
    println!();

    Ok(())
}

/// `2026-03-01 12:00 (in 5m)` style rendering.
fn format_relative(t: chrono::DateTime<Utc>, now: chrono::DateTime<Utc>) -> String {
    let delta = t.signed_duration_since(now);
    let secs = delta.num_seconds();
    let magnitude = secs.unsigned_abs();
    let span = if magnitude < 60 {
        format!("{magnitude}s")
    } else if magnitude < 3600 {
        format!("{}m", magnitude / 60)
    } else if magnitude < 86_400 {
        format!("{}h", magnitude / 3600)
    } else {
        format!("{}d", magnitude / 86_400)
    };
    let when = t.format("%Y-%m-%d %H:%M");
    if secs >= 0 {
        format!("{when} (in {span})")
    } else {
        format!("{when} ({span} ago)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn relative_times_in_both_directions() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            format_relative(now + Duration::minutes(5), now),
            "2026-03-01 12:05 (in 5m)"
        );
        assert_eq!(
            format_relative(now - Duration::hours(2), now),
            "2026-03-01 10:00 (2h ago)"
        );
        assert_eq!(
            format_relative(now + Duration::days(3), now),
            "2026-03-04 12:00 (in 3d)"
        );
    }
}
