//! Handler for the `status` command.

use std::path::Path;

use serde_json::json;

use crate::adapter::inbound::cli::{load_config, output};
use crate::domain::Hostfile;
use crate::error::Result;
use crate::infrastructure::bootstrap::session_store;
use crate::port::SessionStore;

const COLUMNS: &[(&str, usize)] = &[
    ("INSTANCE", 20),
    ("ROLE", 8),
    ("STATE", 12),
    ("ADDRESS", 16),
    ("CORES", 5),
];

/// Show the stored session without contacting the provider.
pub fn execute(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let store = session_store(&config);
    let session = store.load()?;
    let hostfile = session
        .as_ref()
        .map(|s| Hostfile::assemble_with(s.nodes(), config.bootstrap.hostfile_options()));

    if output::is_json() {
        output::json_result(
            "status",
            json!({
                "account": store.account(),
                "session": session,
                "hostfile": hostfile.as_ref().map(Hostfile::entries),
            }),
        );
        return Ok(());
    }

    output::header(env!("CARGO_PKG_VERSION"));
    output::field("Account", store.account());

    let Some(session) = session else {
        println!();
        output::note("No active cluster session");
        output::hint("run `rcluster launch` to start one");
        return Ok(());
    };

    output::field("Session", &session.id);
    output::field("Status", session.status);
    output::field("Image", &session.image_id);
    output::field("Created", session.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    output::field(
        "Workers",
        format!("{}/{}", session.workers().count(), session.desired_workers),
    );

    println!();
    let widths: Vec<usize> = COLUMNS.iter().map(|(_, w)| *w).collect();
    output::table_header(COLUMNS);
    output::table_separator(&widths);
    for node in session.nodes() {
        output::table_row(
            &[
                node.id.to_string(),
                node.role.to_string(),
                node.state.to_string(),
                node.address.clone().unwrap_or_else(|| "-".into()),
                node.core_count.map_or_else(|| "-".into(), |c| c.to_string()),
            ],
            &widths,
        );
    }

    if let Some(hostfile) = hostfile {
        output::section("Hostfile");
        if hostfile.is_empty() {
            output::note("(no worker slots)");
        }
        for entry in hostfile.entries() {
            output::field(&entry.address, format!("{} slot(s)", entry.slots));
        }
    }
    Ok(())
}
