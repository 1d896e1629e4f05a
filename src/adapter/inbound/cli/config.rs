//! Handler for the `config` command group.

use std::fs;
use std::path::Path;

use crate::adapter::inbound::cli::{load_config, output};
use crate::error::{ConfigError, Result};

/// Default config template with documentation.
const CONFIG_TEMPLATE: &str = include_str!("../../../../config.toml.example");

/// Execute `config init`.
pub fn execute_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(ConfigError::InvalidValue {
            field: "config",
            reason: "file already exists (use --force to overwrite)".to_string(),
        }
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, CONFIG_TEMPLATE)?;
    output::section("Config Initialized");
    output::success("Created configuration file");
    output::field("Path", path.display());
    output::section("Next Steps");
    output::note(&format!(
        "1. Set provider.image_id in {} (or pass --image)",
        path.display()
    ));
    output::note("2. Make sure the aws CLI is installed and the profile is configured");
    output::note(&format!("3. Run: rcluster config validate -c {}", path.display()));
    output::note(&format!("4. Run: rcluster launch -c {}", path.display()));
    Ok(())
}

/// Execute `config show`.
pub fn execute_show(path: &Path) -> Result<()> {
    let config = load_config(path)?;

    if output::is_json() {
        output::json_result("config", serde_json::to_value(&config)?);
        return Ok(());
    }

    output::section("Provider");
    output::field("Account", config.account());
    output::field(
        "Image",
        if config.provider.image_id.is_empty() {
            "(not set)"
        } else {
            config.provider.image_id.as_str()
        },
    );
    output::field("Type", &config.provider.instance_type);
    output::field("Address", config.provider.address.as_str());
    output::field("Tag key", &config.provider.tag_key);

    output::section("Provisioning");
    output::field("Workers", config.provisioning.default_workers);
    output::field("Poll", format!("{}s", config.provisioning.poll_interval_secs));
    output::field("Node", format!("{}s", config.provisioning.node_timeout_secs));
    output::field("Session", format!("{}s", config.provisioning.session_timeout_secs));
    output::field(
        "Retry",
        format!(
            "{} attempts, {}ms..{}ms",
            config.retry.max_attempts, config.retry.base_delay_ms, config.retry.max_delay_ms
        ),
    );

    output::section("Bootstrap");
    output::field("Shared home", &config.bootstrap.shared_home);
    output::field("Hostfile", &config.bootstrap.hostfile_name);
    output::field("Manager", plan_summary(config.bootstrap.manager.len()));
    output::field("Worker", plan_summary(config.bootstrap.worker.len()));
    output::field(
        "Endpoint",
        format!("{}://<manager>:{}/", config.service.scheme, config.service.port),
    );

    output::section("State");
    output::field("Directory", config.state_dir().display());

    if output::verbosity() > 0 {
        let rendered = toml::to_string_pretty(&config)
            .map_err(|e| ConfigError::Other(format!("failed to render config: {e}")))?;
        output::section("TOML");
        output::lines(&rendered);
    }
    Ok(())
}

fn plan_summary(steps: usize) -> String {
    if steps == 0 {
        "stock plan".to_string()
    } else {
        format!("{steps} step(s)")
    }
}

/// Execute `config validate`.
pub fn execute_validate(path: &Path) -> Result<()> {
    let config = load_config(path)?;

    output::success("Configuration is valid");
    output::field("Path", path.display());
    if config.provider.image_id.is_empty() {
        output::warning("provider.image_id is not set; launch will need --image");
    }
    Ok(())
}
