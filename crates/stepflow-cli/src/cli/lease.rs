//! Lease maintenance.

use anyhow::Result;
use console::style;
use stepflow_core::store::Store;

use crate::state::AppState;

/// Delete expired leases in the namespace.
///
/// Workers do this on their own cleanup tick; the command exists for
/// namespaces with no running worker.
pub async fn cleanup_leases(state: &AppState, json: bool) -> Result<()> {
    let removed = state.store.cleanup_expired_leases(state.namespace()).await?;
    tracing::info!(namespace = state.namespace(), removed, "expired leases removed");

    if json {
        let result = serde_json::json!({
            "namespace": state.namespace(),
            "removed": removed,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    if removed == 0 {
        println!(
            "  {} No expired leases in '{}'.",
            style("i").blue().bold(),
            style(state.namespace()).cyan(),
        );
    } else {
        println!(
            "  {} Removed {} expired lease{} from '{}'.",
            style("✓").green().bold(),
            style(removed).bold(),
            if removed == 1 { "" } else { "s" },
            style(state.namespace()).cyan(),
        );
    }
    println!();

    Ok(())
}
