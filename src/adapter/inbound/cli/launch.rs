//! Handler for the `launch` command.

use serde_json::json;
use tracing::info;

use crate::adapter::inbound::cli::command::LaunchArgs;
use crate::adapter::inbound::cli::{load_config, output};
use crate::application::{LaunchReport, LaunchRequest};
use crate::error::Result;
use crate::infrastructure::bootstrap::build_orchestrator;

/// Execute the launch command.
///
/// Ctrl-C cancels the launch; the command then waits until every launched
/// instance has been terminated before returning.
pub async fn execute(args: &LaunchArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let image_id = config.image_id(args.image.as_deref())?;
    let workers = args
        .workers
        .unwrap_or(config.provisioning.default_workers);
    let orchestrator = build_orchestrator(&config)?;

    output::header(env!("CARGO_PKG_VERSION"));
    output::field("Account", orchestrator.account());
    output::field("Image", &image_id);
    output::field("Workers", workers);
    if output::verbosity() > 0 {
        output::field("Type", &config.provider.instance_type);
        output::field("Timeout", format!("{}s", config.provisioning.session_timeout_secs));
    }
    println!();

    let pb = output::spinner(&format!("Launching manager and {workers} worker(s)"));
    let launch = orchestrator.launch(LaunchRequest { workers, image_id });
    tokio::pin!(launch);

    let result = tokio::select! {
        result = &mut launch => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, cancelling launch");
            pb.set_message("Cancelling launch and terminating instances");
            orchestrator.cancel_launch();
            launch.await
        }
    };

    match result {
        Ok(report) => {
            output::spinner_success(&pb, "Cluster ready");
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            output::spinner_fail(&pb, "Launch failed");
            Err(e)
        }
    }
}

fn print_report(report: &LaunchReport) {
    let session = &report.session;
    let ready_workers = session.workers().count();

    if output::is_json() {
        output::json_result(
            "launch",
            json!({
                "session_id": session.id,
                "account": session.account,
                "manager": session.manager().id,
                "endpoint": report.endpoint.url(),
                "workers_requested": session.desired_workers,
                "workers_ready": ready_workers,
                "slots": report.hostfile.total_slots(),
                "hostfile": report.hostfile.entries(),
                "failed_workers": report.failed_workers,
            }),
        );
        return;
    }

    output::section("Cluster");
    output::field("Session", &session.id);
    output::field("Manager", &session.manager().id);
    output::field(
        "Workers",
        format!("{ready_workers}/{}", session.desired_workers),
    );
    output::field("Slots", report.hostfile.total_slots());
    output::field("Endpoint", output::highlight(report.endpoint.url()));

    if report.is_partial() {
        let ids: Vec<String> = report
            .failed_workers
            .iter()
            .map(|f| f.id.to_string())
            .collect();
        println!();
        output::warning(&format!(
            "{} worker(s) failed and were left out: {}",
            ids.len(),
            ids.join(", ")
        ));
        for failed in &report.failed_workers {
            output::note(&format!("{}: {}", failed.id, failed.reason));
        }
    }

    if output::verbosity() > 0 && !report.hostfile.is_empty() {
        output::section("Hostfile");
        for entry in report.hostfile.entries() {
            output::field(&entry.address, format!("{} slot(s)", entry.slots));
        }
    }

    println!();
    output::hint("run `rcluster open` to print the endpoint again");
}
