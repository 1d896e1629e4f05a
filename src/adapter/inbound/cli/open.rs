//! Handler for the `open` command.

use std::path::Path;

use serde_json::json;

use crate::adapter::inbound::cli::{load_config, output};
use crate::error::Result;
use crate::infrastructure::bootstrap::build_orchestrator;

/// Print the manager's endpoint.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(&config)?;
    let endpoint = orchestrator.open().await?;

    if output::is_json() {
        output::json_result(
            "endpoint",
            json!({
                "session_id": endpoint.session_id,
                "instance_id": endpoint.instance_id,
                "address": endpoint.address,
                "port": endpoint.port,
                "url": endpoint.url(),
            }),
        );
        return Ok(());
    }
    if output::is_quiet() {
        println!("{}", endpoint.url());
        return Ok(());
    }

    output::field("Session", &endpoint.session_id);
    output::field("Manager", &endpoint.instance_id);
    output::field("Endpoint", output::highlight(endpoint.url()));
    Ok(())
}
