//! Handler for the `terminate` command.

use std::path::Path;

use serde_json::json;

use crate::adapter::inbound::cli::{load_config, output};
use crate::error::Result;
use crate::infrastructure::bootstrap::build_orchestrator;

/// Terminate the stored session. Succeeds when there is nothing to do.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(&config)?;

    let pb = output::spinner("Terminating cluster");
    let report = match orchestrator.terminate().await {
        Ok(report) => report,
        Err(e) => {
            output::spinner_fail(&pb, "Terminate failed");
            return Err(e);
        }
    };

    if output::is_json() {
        pb.finish_and_clear();
        output::json_result(
            "terminate",
            json!({
                "session_id": report.session_id,
                "terminated": report.terminated,
            }),
        );
        return Ok(());
    }

    match &report.session_id {
        Some(session_id) => {
            output::spinner_success(
                &pb,
                &format!("Terminated {} instance(s)", report.terminated.len()),
            );
            output::field("Session", session_id);
        }
        None => {
            pb.finish_and_clear();
            output::note("No active cluster session");
        }
    }
    Ok(())
}
